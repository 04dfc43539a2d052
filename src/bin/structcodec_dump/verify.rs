use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};

use structcodec::{DirectorySpecResolver, StructureCodec};

pub fn command() -> Command {
    Command::new("verify")
        .about("Check that files parse and write back byte-identically")
        .arg(
            Arg::new("input")
                .required(true)
                .action(ArgAction::Append)
                .value_name("INPUT")
                .help("Binary file to verify. Can be passed multiple times."),
        )
}

enum Outcome {
    Identical,
    /// Offset of the first differing byte, or the shorter length.
    Differs(usize),
}

fn verify_one(
    codec: &StructureCodec<DirectorySpecResolver>,
    spec_id: &str,
    input: &str,
) -> Result<Outcome> {
    let original = std::fs::read(input).with_context(|| format!("failed to read `{}`", input))?;
    let store = codec
        .parse(&original, spec_id)
        .with_context(|| format!("failed to decode `{}`", input))?;
    let written = codec
        .write(&store, spec_id)
        .with_context(|| format!("failed to re-encode `{}`", input))?;

    if written == original {
        return Ok(Outcome::Identical);
    }
    let offset = original
        .iter()
        .zip(&written)
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| original.len().min(written.len()));
    Ok(Outcome::Differs(offset))
}

pub fn run(matches: &ArgMatches) -> Result<()> {
    let (codec, spec_id) = crate::codec_from_matches(matches)?;
    let inputs: Vec<&String> = matches
        .get_many::<String>("input")
        .map(|values| values.collect())
        .unwrap_or_default();

    let mut failures = 0;
    for input in &inputs {
        match verify_one(&codec, &spec_id, input) {
            Ok(Outcome::Identical) => println!("OK {}", input),
            Ok(Outcome::Differs(offset)) => {
                failures += 1;
                println!("MISMATCH {} (first difference at offset {:#x})", input, offset);
            }
            Err(e) => {
                failures += 1;
                println!("ERROR {}", input);
                eprintln!("{:#}", e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} inputs did not round-trip", failures, inputs.len());
    }
    Ok(())
}
