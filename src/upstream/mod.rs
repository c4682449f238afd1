// Nuclino MCP — Upstream Module
//
// HTTP access to the Nuclino API. Calls are paced by a per-credential
// sliding-window rate limiter and retried with exponential backoff on
// transient failures.

mod client;
mod error;
mod models;
mod rate_limiter;
mod retry;

pub use client::{ApiKey, UpstreamClient, UpstreamSettings, DEFAULT_BASE_URL};
pub use error::UpstreamError;
pub use models::{
    CollectionKind, Item, ResourceKind, SearchResponse, SearchResult, SearchScope, Team, Workspace,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryHandler};
