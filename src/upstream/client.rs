// Nuclino MCP — Upstream API client
//
// One client per session. Every call is a rate-limit-gated unit run under
// the retry handler: wait for a slot, send the request, and on a retryable
// failure do both again. Successful payloads are validated into typed
// records before they leave this module.

use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use super::error::UpstreamError;
use super::models::{
    parse_list, parse_record, CollectionKind, Item, ResourceKind, SearchResponse, SearchResult,
    SearchScope, Team, Workspace,
};
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::retry::{RetryConfig, RetryHandler};

/// Default upstream API origin.
pub const DEFAULT_BASE_URL: &str = "https://api.nuclino.com";

// ─── Credential ──────────────────────────────────────────────────────────────

/// A Nuclino API key. Zeroed on drop and never shown by `Debug`.
#[derive(Clone)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// The raw key, for the `Authorization` header only.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Everything needed to build an [`UpstreamClient`] except the credential.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: Url,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    /// Per-request timeout. `None` leaves a stalled request pending until
    /// the connection itself fails.
    pub request_timeout: Option<Duration>,
}

impl UpstreamSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: None,
        }
    }

    /// Build the shared HTTP connection pool. It carries no credential or
    /// pacing state, so every session may use a clone of it.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("nuclino-mcp/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    credential: RwLock<ApiKey>,
    rate_limiter: RateLimiter,
    retry: RetryHandler,
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.base_url.as_str())
            .field("rate_limit", &self.rate_limiter.config())
            .field("retry", self.retry.config())
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    /// Create a client with its own rate limiter and retry handler.
    pub fn new(http: reqwest::Client, settings: &UpstreamSettings, credential: ApiKey) -> Self {
        Self {
            http,
            base_url: settings.base_url.clone(),
            credential: RwLock::new(credential),
            rate_limiter: RateLimiter::new(settings.rate_limit),
            retry: RetryHandler::new(settings.retry),
        }
    }

    /// Replace the credential used by every subsequent attempt.
    ///
    /// Requests already on the wire keep the key they were sent with.
    pub async fn update_credential(&self, credential: ApiKey) {
        *self.credential.write().await = credential;
        tracing::debug!("Upstream credential replaced");
    }

    /// Calls recorded in the current rate-limit window.
    pub async fn request_count(&self) -> usize {
        self.rate_limiter.request_count().await
    }

    // ─── Search ──────────────────────────────────────────────────────────────

    /// Full-text search confined to a team or workspace.
    pub async fn search(
        &self,
        scope: &SearchScope,
        query: &str,
        after: Option<&str>,
    ) -> Result<SearchResponse, UpstreamError> {
        let label = match scope {
            SearchScope::Team(_) => "search_by_team",
            SearchScope::Workspace(_) => "search_by_workspace",
        };

        let mut params = vec![("search", query), scope.query_pair()];
        if let Some(cursor) = after {
            params.push(("after", cursor));
        }

        let list = self
            .fetch(label, &["v0", "items"], &params, parse_list::<SearchResult>)
            .await?;
        Ok(SearchResponse {
            results: list.results,
            has_more: list.has_more,
            next_cursor: list.next_cursor,
        })
    }

    pub async fn search_by_team(
        &self,
        query: &str,
        team_id: &str,
        after: Option<&str>,
    ) -> Result<SearchResponse, UpstreamError> {
        self.search(&SearchScope::Team(team_id.to_string()), query, after)
            .await
    }

    pub async fn search_by_workspace(
        &self,
        query: &str,
        workspace_id: &str,
        after: Option<&str>,
    ) -> Result<SearchResponse, UpstreamError> {
        self.search(&SearchScope::Workspace(workspace_id.to_string()), query, after)
            .await
    }

    // ─── Collections ─────────────────────────────────────────────────────────

    /// Every record of a collection visible to the credential.
    pub async fn list_collection<T: DeserializeOwned>(
        &self,
        kind: CollectionKind,
    ) -> Result<Vec<T>, UpstreamError> {
        let label = match kind {
            CollectionKind::Teams => "get_teams",
            CollectionKind::Workspaces => "get_workspaces",
        };
        let list = self
            .fetch(label, &kind.segments(), &[], parse_list::<T>)
            .await?;
        Ok(list.results)
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>, UpstreamError> {
        self.list_collection(CollectionKind::Teams).await
    }

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>, UpstreamError> {
        self.list_collection(CollectionKind::Workspaces).await
    }

    // ─── Single records ──────────────────────────────────────────────────────

    pub async fn get_by_id<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<T, UpstreamError> {
        let label = match kind {
            ResourceKind::Item => "get_item",
            ResourceKind::Team => "get_team",
            ResourceKind::Workspace => "get_workspace",
        };
        self.fetch(label, &kind.segments(id), &[], parse_record)
            .await
    }

    pub async fn get_item(&self, id: &str) -> Result<Item, UpstreamError> {
        self.get_by_id(ResourceKind::Item, id).await
    }

    pub async fn get_team(&self, id: &str) -> Result<Team, UpstreamError> {
        self.get_by_id(ResourceKind::Team, id).await
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Workspace, UpstreamError> {
        self.get_by_id(ResourceKind::Workspace, id).await
    }

    // ─── Transport ───────────────────────────────────────────────────────────

    /// Run one GET as a retried, rate-limited unit. The payload is
    /// validated inside the attempt, so a malformed body fails the unit
    /// (unretried) under the operation's label.
    async fn fetch<T>(
        &self,
        label: &str,
        segments: &[&str],
        params: &[(&str, &str)],
        parse: impl Fn(Value) -> Result<T, UpstreamError>,
    ) -> Result<T, UpstreamError> {
        let url = self.endpoint(segments)?;
        let url = &url;
        let parse = &parse;
        self.retry
            .execute(label, || async move {
                self.rate_limiter.wait_for_slot().await;
                let payload = self.send(label, url, params).await?;
                parse(payload)
            })
            .await
    }

    async fn send(
        &self,
        label: &str,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<Value, UpstreamError> {
        // Read at send time so a credential swap applies to the next attempt.
        let credential = self.credential.read().await.clone();

        let response = self
            .http
            .get(url.clone())
            .header(AUTHORIZATION, credential.expose())
            .header(CONTENT_TYPE, "application/json")
            .query(params)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = response.status();
        tracing::debug!(operation = label, status = status.as_u16(), "Upstream response");

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(UpstreamError::from_reqwest)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
