// Nuclino MCP — Knowledge-base records
//
// Typed views of the upstream payloads. Field names follow the upstream
// camelCase convention on both the wire and in tool output.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::UpstreamError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Collections have no body; they come back with empty content.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Where a search is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    Team(String),
    Workspace(String),
}

impl SearchScope {
    /// Query parameter naming this scope.
    pub(crate) fn query_pair(&self) -> (&'static str, &str) {
        match self {
            SearchScope::Team(id) => ("teamId", id),
            SearchScope::Workspace(id) => ("workspaceId", id),
        }
    }
}

/// Listable upstream collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Teams,
    Workspaces,
}

impl CollectionKind {
    pub(crate) fn segments(self) -> [&'static str; 2] {
        match self {
            CollectionKind::Teams => ["v0", "teams"],
            CollectionKind::Workspaces => ["v0", "workspaces"],
        }
    }
}

/// Upstream resources addressable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Item,
    Team,
    Workspace,
}

impl ResourceKind {
    /// Path segments for the resource; the id is percent-encoded when
    /// joined onto the base URL.
    pub(crate) fn segments(self, id: &str) -> [&str; 3] {
        let collection = match self {
            ResourceKind::Item => "items",
            ResourceKind::Team => "teams",
            ResourceKind::Workspace => "workspaces",
        };
        ["v0", collection, id]
    }
}

// ─── Payload validation ──────────────────────────────────────────────────────

/// List-shaped payload: the `results` container is mandatory.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListPayload<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Strip the `{"status": ..., "data": ...}` envelope if the API used one.
fn unwrap_envelope(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.contains_key("status") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Parse a list or search payload, rejecting anything without `results`.
pub(crate) fn parse_list<T: DeserializeOwned>(payload: Value) -> Result<ListPayload<T>, UpstreamError> {
    let payload = unwrap_envelope(payload);
    if payload.get("results").map_or(true, |r| !r.is_array()) {
        return Err(UpstreamError::MalformedResponse(
            "expected a `results` array".to_string(),
        ));
    }
    serde_json::from_value(payload).map_err(|e| UpstreamError::MalformedResponse(e.to_string()))
}

/// Parse a single-record payload, which must be an object with a string `id`.
pub(crate) fn parse_record<T: DeserializeOwned>(payload: Value) -> Result<T, UpstreamError> {
    let payload = unwrap_envelope(payload);
    if !payload.get("id").is_some_and(Value::is_string) {
        return Err(UpstreamError::MalformedResponse(
            "expected an object with a string `id`".to_string(),
        ));
    }
    serde_json::from_value(payload).map_err(|e| UpstreamError::MalformedResponse(e.to_string()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
