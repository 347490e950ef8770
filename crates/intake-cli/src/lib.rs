//! The `intake` command line tool.
//!
//! ```text
//! intake process --input <path-or-literal> [--conversation <hint>] [--format <hint>] [--config <path>]
//! intake history --conversation <id> [--config <path>]
//! ```
//!
//! Records and histories go to stdout as JSON; logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use intake_core::{InputFormat, IntakeError, RawInput};
use intake_pipeline::{IntakeConfig, Pipeline, PipelineError};
use serde::Serialize;
use std::path::Path;

/// Exit statuses.
pub mod exit {
    pub const OK: u8 = 0;
    pub const USAGE: u8 = 1;
    pub const UNROUTABLE: u8 = 2;
    pub const MALFORMED: u8 = 3;
    pub const STORE: u8 = 4;
}

#[derive(Debug, Parser)]
#[command(name = "intake")]
#[command(about = "Classify, extract and record business inputs", version)]
pub struct Cli {
    /// Config file (defaults to $INTAKE_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process one input and print the stored entry
    Process {
        /// File path, or literal content
        #[arg(long)]
        input: String,

        /// Conversation hint; the same hint always lands in the same conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Format hint: structured, communication, document
        #[arg(long)]
        format: Option<String>,
    },

    /// Print the stored entries of a conversation
    History {
        #[arg(long)]
        conversation: String,
    },
}

/// Extensions that make an argument read as a file path.
const PATH_EXTENSIONS: &[&str] = &["json", "eml", "pdf", "txt", "msg", "yaml", "yml"];

/// Turn `--input` into a [`RawInput`]. An existing file is read; a
/// path-like argument that does not exist is an error; anything else is
/// literal content.
pub fn resolve_input(arg: &str) -> Result<RawInput> {
    let path = Path::new(arg);
    if path.is_file() {
        return read_file(path);
    }
    if looks_like_path(arg) {
        bail!("input file not found: {}", arg);
    }
    Ok(RawInput::text(arg).with_source_name("literal"))
}

fn read_file(path: &Path) -> Result<RawInput> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let hint = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(format_for_extension);

    let raw = match (hint, String::from_utf8(bytes)) {
        (Some(InputFormat::Document), Ok(text)) => RawInput::bytes(text.into_bytes()),
        (_, Ok(text)) => RawInput::text(text),
        (_, Err(err)) => RawInput::bytes(err.into_bytes()),
    };
    let raw = match hint {
        Some(format) => raw.with_declared_format(format),
        None => raw,
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(raw.with_source_name(name))
}

pub fn format_for_extension(ext: &str) -> Option<InputFormat> {
    match ext.to_ascii_lowercase().as_str() {
        "json" => Some(InputFormat::Structured),
        "eml" => Some(InputFormat::Communication),
        "pdf" => Some(InputFormat::Document),
        _ => None,
    }
}

fn looks_like_path(arg: &str) -> bool {
    if arg.is_empty() || arg.contains(char::is_whitespace) || arg.starts_with(['{', '[']) {
        return false;
    }
    if arg.contains('/') || arg.contains('\\') {
        return true;
    }
    Path::new(arg)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PATH_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Exit status for a pipeline failure.
pub fn exit_code_for(err: &PipelineError) -> u8 {
    match err {
        PipelineError::NotPersisted { .. } => exit::STORE,
        PipelineError::Rejected(err) => match err {
            IntakeError::UnroutableInput(_) | IntakeError::UnextractableDocument(_) => {
                exit::UNROUTABLE
            }
            IntakeError::MalformedPayload(_) => exit::MALFORMED,
            IntakeError::StoreUnavailable(_) => exit::STORE,
            IntakeError::GenerationFailure(_)
            | IntakeError::SchemaError(_)
            | IntakeError::ConfigError(_) => exit::USAGE,
        },
    }
}

/// Run a parsed command line. `Err` means a usage or configuration problem.
pub async fn run(cli: Cli) -> Result<u8> {
    let config = IntakeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Process {
            input,
            conversation,
            format,
        } => {
            let mut raw = resolve_input(&input)?;
            if let Some(format) = format {
                let declared = InputFormat::parse(&format)
                    .with_context(|| format!("unknown format '{}'", format))?;
                raw = raw.with_declared_format(declared);
            }
            let pipeline = Pipeline::from_config(&config)
                .await
                .context("failed to assemble pipeline")?;
            process(&pipeline, &raw, conversation.as_deref()).await
        }
        Command::History { conversation } => {
            let pipeline = Pipeline::from_config(&config)
                .await
                .context("failed to assemble pipeline")?;
            match pipeline.history(&conversation).await {
                Ok(entries) => {
                    print_json(&entries)?;
                    Ok(exit::OK)
                }
                Err(err) => {
                    eprintln!("error: {}", err);
                    Ok(exit_code_for(&PipelineError::Rejected(err)))
                }
            }
        }
    }
}

/// Process one input and print the result. A record that could not be
/// stored is still printed before exiting with the store status.
pub async fn process(pipeline: &Pipeline, raw: &RawInput, hint: Option<&str>) -> Result<u8> {
    match pipeline.process(raw, hint).await {
        Ok(outcome) => {
            print_json(&outcome)?;
            Ok(exit::OK)
        }
        Err(err) => {
            if let Some(pending) = err.pending() {
                print_json(pending)?;
            }
            eprintln!("error: {}", err);
            Ok(exit_code_for(&err))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
