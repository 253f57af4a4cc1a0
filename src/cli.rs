//! Command-line entry point arguments.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sentinel", about = "L7 admission proxy")]
pub struct Args {
    /// Path to an optional TOML config file, layered under environment variables.
    #[arg(long)]
    pub config: Option<String>,

    /// Override the configured rules directory.
    #[arg(long)]
    pub rules_dir: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = default_format())]
    pub log_format: TracingFormat,

    /// Override the configured log level (e.g. "debug", "warn").
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

fn default_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the admission proxy (default).
    Serve,
    /// Load and validate the rules directory, then exit.
    CheckRules,
}
