// Nuclino MCP — CLI Command Handlers
//
// Each function handles one CLI subcommand. `serve` validates the
// configuration, builds the selected transport, and runs it until the
// client goes away or the process is asked to stop.

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::gateway::Transport;

use super::Commands;

/// Execute the parsed CLI command.
pub async fn execute(command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Serve(args) => cmd_serve(GatewayConfig::try_from(args)?).await,
    }
}

// ─── Serve ───────────────────────────────────────────────────────────────────

async fn cmd_serve(config: GatewayConfig) -> Result<(), AppError> {
    tracing::info!(
        transport = ?config.transport.kind(),
        base_url = %config.upstream.base_url,
        rate_limit = config.upstream.rate_limit.max_requests,
        max_retries = config.upstream.retry.max_retries,
        "Starting Nuclino MCP server"
    );

    let transport = Transport::from_config(config)?;
    transport.run(shutdown_signal()).await?;

    tracing::info!("Nuclino MCP server stopped");
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
