use anyhow::{Context, Result, bail, format_err};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use encoding::Encoding;
use encoding::all::{ISO_8859_1, encodings};
use indoc::indoc;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use structcodec::{CodecSettings, DirectorySpecResolver, StructureCodec};

use std::fs::{self, File};
use std::path::Path;
use std::process::exit;

mod decode;
mod encode;
mod verify;

/// Arguments shared by every subcommand that needs a structure spec.
fn with_spec_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("spec-dir")
            .long("spec-dir")
            .short('d')
            .value_name("DIR")
            .default_value(".")
            .help("Directory holding `<spec>.json` structure specs."),
    )
    .arg(
        Arg::new("spec")
            .long("spec")
            .short('s')
            .required(true)
            .value_name("ID")
            .help("Id of the structure spec, i.e. its file name without `.json`."),
    )
}

fn with_output_args(cmd: Command, required: bool) -> Command {
    cmd.arg(
        Arg::new("output-target")
            .long("output")
            .short('o')
            .required(required)
            .value_name("PATH")
            .help(indoc!(
                "Writes output to the file specified instead of stdout, errors will still be printed to stderr.
                 Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`.
                 Will create parent directories if needed."
            )),
    )
    .arg(
        Arg::new("no-confirm-overwrite")
            .long("no-confirm-overwrite")
            .action(ArgAction::SetTrue)
            .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
    )
}

/// Build a codec from the spec arguments of `matches` and the global settings flags.
pub(crate) fn codec_from_matches(
    matches: &ArgMatches,
) -> Result<(StructureCodec<DirectorySpecResolver>, String)> {
    let spec_dir = matches
        .get_one::<String>("spec-dir")
        .map(String::as_str)
        .unwrap_or(".");
    let spec_id = matches
        .get_one::<String>("spec")
        .ok_or_else(|| format_err!("`--spec` is required"))?
        .clone();

    let encoding_name = matches
        .get_one::<String>("text-encoding")
        .map(String::as_str)
        .unwrap_or(ISO_8859_1.name());
    let text_encoding = encodings()
        .iter()
        .find(|e| e.name() == encoding_name)
        .copied()
        .ok_or_else(|| format_err!("unknown text encoding `{}`", encoding_name))?;

    let mut settings = CodecSettings::new()
        .text_encoding(text_encoding)
        .strict_trailing_bytes(matches.get_flag("strict-trailing-bytes"));
    if let Some(limit) = matches.get_one::<usize>("max-repeat-count") {
        settings = settings.max_repeat_count(*limit);
    }

    let codec = StructureCodec::new(DirectorySpecResolver::new(spec_dir)).with_configuration(settings);
    // Fail early on a bad spec, before any input is read.
    codec
        .load_spec(&spec_id)
        .with_context(|| format!("failed to load structure spec `{}` from `{}`", spec_id, spec_dir))?;

    Ok((codec, spec_id))
}

/// If `prompt` is passed, will display a confirmation prompt before overwriting files.
pub(crate) fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
    let p = path.as_ref();

    if p.is_dir() {
        bail!(
            "There is a directory at {}, refusing to overwrite",
            p.display()
        );
    }

    if p.exists() {
        if prompt {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Are you sure you want to override output file at {}",
                    p.display()
                ))
                .default(false)
                .interact()
                .context("Failed to write confirmation prompt to term")?;
            if !confirmed {
                bail!("Cancelled");
            }
        }
    } else if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create `{}`", parent.display()))?;
        }
    }

    File::create(p).with_context(|| format!("failed to create output file `{}`", p.display()))
}

pub(crate) fn output_target(matches: &ArgMatches) -> Option<(&str, bool)> {
    matches.get_one::<String>("output-target").map(|path| {
        (
            path.as_str(),
            !matches.get_flag("no-confirm-overwrite"),
        )
    })
}

fn try_to_initialize_logging(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3 => LevelFilter::Trace,
        _ => {
            eprintln!("using more than -vvv does not affect verbosity level");
            LevelFilter::Trace
        }
    };

    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn cli() -> Command {
    let text_encodings: Vec<&'static str> = encodings()
        .iter()
        .filter(|e| e.raw_decoder().is_ascii_compatible())
        .map(|e| e.name())
        .collect();

    Command::new("structcodec_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Decode, encode and verify binary files described by structure specs")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help(indoc!(
                    "-v - info, -vv - debug, -vvv - trace.
                     trace output is only available in debug builds, as it is extremely verbose"
                )),
        )
        .arg(
            Arg::new("text-encoding")
                .long("text-encoding")
                .global(true)
                .value_parser(clap::builder::PossibleValuesParser::new(text_encodings))
                .default_value(ISO_8859_1.name())
                .help("Single-byte encoding of `Text` fields."),
        )
        .arg(
            Arg::new("strict-trailing-bytes")
                .long("strict-trailing-bytes")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Fail instead of warning when bytes remain after the last field."),
        )
        .arg(
            Arg::new("max-repeat-count")
                .long("max-repeat-count")
                .global(true)
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Upper bound for a single repeated group's item count."),
        )
        .subcommand(with_output_args(with_spec_args(decode::command()), false))
        .subcommand(with_output_args(with_spec_args(encode::command()), true))
        .subcommand(with_spec_args(verify::command()))
}

fn run(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("decode", sub)) => decode::run(sub),
        Some(("encode", sub)) => encode::run(sub),
        Some(("verify", sub)) => verify::run(sub),
        Some((other, _)) => bail!("unknown subcommand `{}`", other),
        None => bail!("a subcommand is required"),
    }
}

fn main() {
    let matches = cli().get_matches();
    try_to_initialize_logging(matches.get_count("verbose"));

    if let Err(e) = run(&matches) {
        eprintln!("{:?}", e);
        exit(1);
    }
}
