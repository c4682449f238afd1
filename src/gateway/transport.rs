// Nuclino MCP — Transport selection

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use super::error::GatewayError;
use super::http::HttpGateway;
use super::session::SessionRegistry;
use super::stdio::StdioGateway;
use crate::config::{GatewayConfig, TransportConfig, TransportKind};

/// A ready-to-run transport over a fresh session registry.
pub enum Transport {
    Stdio(StdioGateway),
    Http { gateway: HttpGateway, addr: SocketAddr },
}

impl Transport {
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        let registry = Arc::new(SessionRegistry::new(config.upstream)?);
        Ok(match config.transport {
            TransportConfig::Stdio { api_key } => {
                Transport::Stdio(StdioGateway::new(registry, api_key))
            }
            TransportConfig::Http { addr } => Transport::Http {
                gateway: HttpGateway::new(registry),
                addr,
            },
        })
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Http { .. } => TransportKind::Http,
        }
    }

    /// Run until the transport ends or `shutdown` resolves. All sessions
    /// are closed before this returns.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        match self {
            Transport::Stdio(gateway) => gateway.run(shutdown).await,
            Transport::Http { gateway, addr } => gateway.serve(addr, shutdown).await,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
