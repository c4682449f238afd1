// Nuclino MCP — CLI Module
//
// Command-line interface using clap derive macros.
// Subcommands: serve.

mod commands;

use clap::{Parser, Subcommand};

use crate::config::{LogFormat, ServeArgs};

pub use commands::execute;

/// Nuclino MCP: a Model Context Protocol gateway for the Nuclino API.
#[derive(Parser, Debug)]
#[command(name = "nuclino-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format on stderr.
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the MCP gateway (stdio or HTTP transport).
    Serve(ServeArgs),
}

// ─── Tests ───────────────────────────────────────────────────────────────────
