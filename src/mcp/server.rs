// Nuclino MCP — MCP Server Implementation
//
// Uses the rmcp crate (official Rust MCP SDK) to expose the knowledge
// base as discoverable tools. One server instance runs per session and
// talks to the upstream only through that session's client.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::{tool, tool_handler, tool_router};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::{Deserialize, Serialize};

use crate::upstream::{UpstreamClient, UpstreamError};

// ─── Tool Parameter Types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchByTeamParams {
    /// The search query to find matching content
    pub query: String,
    /// The team ID to search within (get this from get_teams first)
    pub team_id: String,
    /// Pagination cursor for next page
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchByWorkspaceParams {
    /// The search query to find matching content
    pub query: String,
    /// The workspace ID to search within (get this from get_workspaces or find_workspace_by_name first)
    pub workspace_id: String,
    /// Pagination cursor for next page
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct FindByNameParams {
    /// Name to search for (case-insensitive, partial matches work)
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdParams {
    /// The item ID to retrieve
    pub item_id: String,
}

// ─── Server State ────────────────────────────────────────────────────────────

/// The MCP server for one session.
#[derive(Clone)]
pub struct NuclinoServer {
    upstream: Arc<UpstreamClient>,
    tool_router: ToolRouter<Self>,
}

impl NuclinoServer {
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self {
            upstream,
            tool_router: Self::tool_router(),
        }
    }
}

/// Render a value as a pretty JSON text result.
fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Upstream failures become an error payload on the same stream; the
/// session itself stays usable.
fn upstream_failure(e: UpstreamError) -> CallToolResult {
    tracing::warn!(error = %e, "Tool call failed");
    CallToolResult::error(vec![Content::text(format!("Error: {}", e))])
}

fn matches_name(candidate: &str, needle: &str) -> bool {
    candidate.to_lowercase().contains(&needle.to_lowercase())
}

// ─── Tool Definitions ────────────────────────────────────────────────────────

#[tool_router]
impl NuclinoServer {
    #[tool(
        description = "Search Nuclino content within a specific team. Use this when you don't know which workspace to search in - first get teams with get_teams, then use the first team's ID."
    )]
    async fn search_by_team(
        &self,
        params: Parameters<SearchByTeamParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self
            .upstream
            .search_by_team(&p.query, &p.team_id, p.after.as_deref())
            .await
        {
            Ok(response) => json_result(&response),
            Err(e) => Ok(upstream_failure(e)),
        }
    }

    #[tool(
        description = "Search Nuclino content within a specific workspace. Use this when you know which workspace to search in - first get workspaces with get_workspaces or find one by name with find_workspace_by_name."
    )]
    async fn search_by_workspace(
        &self,
        params: Parameters<SearchByWorkspaceParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self
            .upstream
            .search_by_workspace(&p.query, &p.workspace_id, p.after.as_deref())
            .await
        {
            Ok(response) => json_result(&response),
            Err(e) => Ok(upstream_failure(e)),
        }
    }

    #[tool(
        description = "Get all teams available to the current user. Use this first to get team IDs for search_by_team. Most users have only one team."
    )]
    async fn get_teams(&self) -> Result<CallToolResult, McpError> {
        match self.upstream.list_teams().await {
            Ok(teams) => json_result(&teams),
            Err(e) => Ok(upstream_failure(e)),
        }
    }

    #[tool(
        description = "Get all workspaces available to the current user. Use this to get workspace IDs for search_by_workspace."
    )]
    async fn get_workspaces(&self) -> Result<CallToolResult, McpError> {
        match self.upstream.list_workspaces().await {
            Ok(workspaces) => json_result(&workspaces),
            Err(e) => Ok(upstream_failure(e)),
        }
    }

    #[tool(description = "Find a team by name (case-insensitive, partial matches work)")]
    async fn find_team_by_name(
        &self,
        params: Parameters<FindByNameParams>,
    ) -> Result<CallToolResult, McpError> {
        let teams = match self.upstream.list_teams().await {
            Ok(teams) => teams,
            Err(e) => return Ok(upstream_failure(e)),
        };
        match teams.iter().find(|t| matches_name(&t.name, &params.0.name)) {
            Some(team) => json_result(team),
            None => Ok(CallToolResult::success(vec![Content::text("Team not found")])),
        }
    }

    #[tool(
        description = "Find a workspace by name. Use this to get a workspace ID when you know its name (e.g. 'Engineering', 'Product'). Partial matches work."
    )]
    async fn find_workspace_by_name(
        &self,
        params: Parameters<FindByNameParams>,
    ) -> Result<CallToolResult, McpError> {
        let workspaces = match self.upstream.list_workspaces().await {
            Ok(workspaces) => workspaces,
            Err(e) => return Ok(upstream_failure(e)),
        };
        match workspaces
            .iter()
            .find(|w| matches_name(&w.name, &params.0.name))
        {
            Some(workspace) => json_result(workspace),
            None => Ok(CallToolResult::success(vec![Content::text(
                "Workspace not found",
            )])),
        }
    }

    #[tool(description = "Get a specific item by ID, including its content")]
    async fn get_item(
        &self,
        params: Parameters<ItemIdParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.0.item_id.trim().is_empty() {
            return Err(McpError::invalid_params("itemId must not be empty", None));
        }
        match self.upstream.get_item(&params.0.item_id).await {
            Ok(item) => json_result(&item),
            Err(e) => Ok(upstream_failure(e)),
        }
    }
}

// ─── ServerHandler ───────────────────────────────────────────────────────────

#[tool_handler]
impl ServerHandler for NuclinoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "nuclino-server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Nuclino knowledge base. List teams or workspaces first, then \
                 search within one of them and fetch items by ID."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
