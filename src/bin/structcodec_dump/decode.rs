use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indoc::indoc;
use serde_json::{Value as JsonValue, json};

use structcodec::{DirectorySpecResolver, StructureCodec};

use std::io::{self, Write};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

pub fn command() -> Command {
    Command::new("decode")
        .about("Parse binary files into JSON stores")
        .long_about(indoc!(r#"
            Parse binary files into JSON stores.

            A single input is printed as one JSON document. Several inputs are printed as
            JSON lines of the form `{"input": "<path>", "store": {...}}`, in argument order.
        "#))
        .arg(
            Arg::new("input")
                .required(true)
                .action(ArgAction::Append)
                .value_name("INPUT")
                .help("Binary file to decode. Can be passed multiple times."),
        )
        .arg(
            Arg::new("compact")
                .long("compact")
                .action(ArgAction::SetTrue)
                .help("When set, output will not be indented."),
        )
}

fn decode_one(codec: &StructureCodec<DirectorySpecResolver>, spec_id: &str, input: &str) -> Result<JsonValue> {
    let bytes = std::fs::read(input).with_context(|| format!("failed to read `{}`", input))?;
    let store = codec
        .parse(&bytes, spec_id)
        .with_context(|| format!("failed to decode `{}`", input))?;
    Ok(store.to_json()?)
}

pub fn run(matches: &ArgMatches) -> Result<()> {
    let (codec, spec_id) = crate::codec_from_matches(matches)?;
    let inputs: Vec<&str> = matches
        .get_many::<String>("input")
        .map(|values| values.map(String::as_str).collect())
        .unwrap_or_default();
    let compact = matches.get_flag("compact");

    #[cfg(feature = "multithreading")]
    let results: Vec<Result<JsonValue>> = inputs
        .par_iter()
        .map(|input| decode_one(&codec, &spec_id, input))
        .collect();

    #[cfg(not(feature = "multithreading"))]
    let results: Vec<Result<JsonValue>> = inputs
        .iter()
        .map(|input| decode_one(&codec, &spec_id, input))
        .collect();

    let mut output: Box<dyn Write> = match crate::output_target(matches) {
        Some((path, prompt)) => Box::new(crate::create_output_file(path, prompt)?),
        None => Box::new(io::stdout()),
    };

    let mut failures = 0;
    let single = inputs.len() == 1;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(store) if single => {
                let text = if compact {
                    serde_json::to_string(&store)?
                } else {
                    serde_json::to_string_pretty(&store)?
                };
                writeln!(output, "{}", text)?;
            }
            Ok(store) => {
                let line = json!({ "input": input, "store": store });
                writeln!(output, "{}", serde_json::to_string(&line)?)?;
            }
            Err(e) => {
                failures += 1;
                eprintln!("{:#}", e);
            }
        }
    }
    output.flush()?;

    if failures > 0 {
        bail!("{} of {} inputs failed to decode", failures, inputs.len());
    }
    Ok(())
}
