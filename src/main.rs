// Nuclino MCP — Application Entry Point
//
// Parses CLI arguments, initializes structured logging on stderr (stdout
// belongs to the stdio transport, and API keys are never logged), and
// dispatches to the command handler.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nuclino_mcp::cli::{execute, Cli};
use nuclino_mcp::config::LogFormat;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG=nuclino_mcp=debug for verbose output.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nuclino_mcp=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    if let Err(e) = execute(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
