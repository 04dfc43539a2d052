use anyhow::{Context, Result, format_err};
use clap::{Arg, ArgMatches, Command};

use structcodec::DataStore;

use std::io::Write;

pub fn command() -> Command {
    Command::new("encode")
        .about("Serialize a JSON store (as printed by `decode`) back into a binary file")
        .arg(
            Arg::new("store")
                .required(true)
                .value_name("STORE_JSON")
                .help("JSON store to encode."),
        )
}

pub fn run(matches: &ArgMatches) -> Result<()> {
    let (codec, spec_id) = crate::codec_from_matches(matches)?;
    let store_path = matches
        .get_one::<String>("store")
        .ok_or_else(|| format_err!("a store is required"))?;

    let text = std::fs::read_to_string(store_path)
        .with_context(|| format!("failed to read `{}`", store_path))?;
    let store = DataStore::from_json_str(&text)
        .with_context(|| format!("`{}` is not a valid store", store_path))?;
    let bytes = codec
        .write(&store, &spec_id)
        .with_context(|| format!("failed to encode `{}`", store_path))?;

    let (path, prompt) =
        crate::output_target(matches).ok_or_else(|| format_err!("`--output` is required"))?;
    let mut output = crate::create_output_file(path, prompt)?;
    output.write_all(&bytes)?;
    log::info!("Wrote {} bytes to {}", bytes.len(), path);
    Ok(())
}
