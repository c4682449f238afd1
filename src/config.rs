// Nuclino MCP — Runtime configuration
//
// `serve` arguments come from flags or the environment (clap `env`).
// They are validated once, up front, into a `GatewayConfig`; a stdio
// server without an API key never starts.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Args, ValueEnum};
use reqwest::Url;
use thiserror::Error;

use crate::upstream::{ApiKey, RateLimitConfig, RetryConfig, UpstreamSettings, DEFAULT_BASE_URL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// One session over stdin/stdout.
    Stdio,
    /// Many sessions over HTTP.
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("NUCLINO_API_KEY environment variable is required for stdio transport")]
    MissingApiKey,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Arguments of `nuclino-mcp serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Transport: "stdio" for a single local session, "http" for a multi-session endpoint.
    #[arg(long, env = "TRANSPORT_TYPE", value_enum, default_value_t = TransportKind::Http)]
    pub transport: TransportKind,

    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Nuclino API key. Required for stdio; HTTP clients send their own.
    #[arg(long, env = "NUCLINO_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Nuclino API origin.
    #[arg(long, env = "NUCLINO_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Upstream calls allowed per session within one rate-limit window.
    #[arg(long, default_value_t = 150)]
    pub rate_limit: usize,

    /// Rate-limit window length in seconds.
    #[arg(long, default_value_t = 60)]
    pub rate_window_secs: u64,

    /// Retries after the first attempt of a transient upstream failure.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub retry_base_delay_ms: u64,

    /// Upper bound on any retry delay, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub retry_max_delay_ms: u64,

    /// Multiplier applied to the delay after each retry.
    #[arg(long, default_value_t = 2.0)]
    pub backoff_factor: f64,

    /// Per-request upstream timeout in seconds. Unset means no timeout.
    #[arg(long)]
    pub upstream_timeout_secs: Option<u64>,
}

/// How the selected transport should run.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio { api_key: ApiKey },
    Http { addr: SocketAddr },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Http { .. } => TransportKind::Http,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub transport: TransportConfig,
    pub upstream: UpstreamSettings,
}

impl TryFrom<ServeArgs> for GatewayConfig {
    type Error = ConfigError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let base_url = Url::parse(&args.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: args.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: args.base_url,
                reason: "expected an http(s) origin".to_string(),
            });
        }

        if args.rate_limit == 0 {
            return Err(invalid("--rate-limit", "must be at least 1"));
        }
        if args.rate_window_secs == 0 {
            return Err(invalid("--rate-window-secs", "must be at least 1"));
        }
        if !args.backoff_factor.is_finite() || args.backoff_factor < 1.0 {
            return Err(invalid("--backoff-factor", "must be a number >= 1.0"));
        }
        if args.retry_base_delay_ms > args.retry_max_delay_ms {
            return Err(invalid(
                "--retry-base-delay-ms",
                "must not exceed --retry-max-delay-ms",
            ));
        }
        if args.upstream_timeout_secs == Some(0) {
            return Err(invalid("--upstream-timeout-secs", "must be at least 1"));
        }

        let transport = match args.transport {
            TransportKind::Stdio => {
                let api_key = args
                    .api_key
                    .filter(|key| !key.trim().is_empty())
                    .ok_or(ConfigError::MissingApiKey)?;
                TransportConfig::Stdio {
                    api_key: ApiKey::new(api_key),
                }
            }
            TransportKind::Http => TransportConfig::Http {
                addr: SocketAddr::new(args.host, args.port),
            },
        };

        let upstream = UpstreamSettings {
            base_url,
            rate_limit: RateLimitConfig {
                max_requests: args.rate_limit,
                window: Duration::from_secs(args.rate_window_secs),
            },
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay: Duration::from_millis(args.retry_base_delay_ms),
                max_delay: Duration::from_millis(args.retry_max_delay_ms),
                backoff_factor: args.backoff_factor,
            },
            request_timeout: args.upstream_timeout_secs.map(Duration::from_secs),
        };

        Ok(Self {
            transport,
            upstream,
        })
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
