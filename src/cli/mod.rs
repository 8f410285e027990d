//! Command-line interface for the `toolbridge` binary.
//!
//! Parsing only: [`Cli::parse_args`] returns the flags, and `main`
//! decides what to do with them (load config, set the tracing filter).

use std::path::PathBuf;

use clap::Parser;

/// toolbridge - protocol-translating reverse proxy for OpenAI- and
/// Ollama-shaped LLM clients and backends.
#[derive(Parser, Debug)]
#[command(
    name = "toolbridge",
    author,
    version,
    about = "Protocol-translating reverse proxy between OpenAI- and Ollama-shaped LLM clients and backends",
    long_about = "Accepts OpenAI Chat Completions and Ollama chat/generate requests, translates\n\
                  them to whichever backend format is configured, and synthesizes tool calling\n\
                  via XML injection for backends without native tool support.",
    after_help = "EXAMPLES:\n    \
                  toolbridge                        # start with .env / environment configuration\n    \
                  toolbridge --config toolbridge.toml\n    \
                  toolbridge --debug                # verbose request/response logging"
)]
pub struct Cli {
    /// Path to an optional TOML configuration file; environment
    /// variables always override values loaded from it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug-level logging, equivalent to setting DEBUG_MODE=true.
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
