// Nuclino MCP — Top-level error types
//
// Aggregates configuration and gateway errors into a single error enum
// for the application boundary.

use thiserror::Error;

/// Top-level error type for all Nuclino MCP operations.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),
}

pub type Result<T> = std::result::Result<T, AppError>;
