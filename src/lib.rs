// Nuclino MCP — Library root
//
// Re-exports the CLI, configuration, gateway, MCP, and upstream modules.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod upstream;

pub use error::{AppError, Result};
