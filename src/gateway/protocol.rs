// Nuclino MCP — JSON-RPC 2.0 Frame Helpers
//
// The MCP state machine itself lives in rmcp; the gateway only needs to
// tell frames apart, spot initialize requests, and render its own
// rejections in JSON-RPC form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request as seen by the gateway.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

/// A JSON-RPC 2.0 error response produced by the gateway itself.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub error: JsonRpcError,
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const INTERNAL_ERROR: i32 = -32603;
// Server-defined: request rejected before reaching a session
pub const BAD_REQUEST: i32 = -32000;

impl JsonRpcResponse {
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            error: JsonRpcError {
                code,
                message: message.into(),
                data: None,
            },
            id,
        }
    }

    /// Parse errors carry a null id because the id could not be read.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(Value::Null, PARSE_ERROR, message)
    }
}

impl JsonRpcRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.jsonrpc != "2.0" {
            return Err("jsonrpc must be \"2.0\"".to_string());
        }
        if self.method.is_empty() {
            return Err("method must not be empty".to_string());
        }
        Ok(())
    }
}

/// What a single inbound frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Has `method` and `id`; expects a response.
    Request,
    /// Has `method`, no `id`.
    Notification,
    /// Has `id` and `result` or `error`; answers a server-initiated request.
    Response,
}

/// Classify a frame, or `None` if it is not a JSON-RPC message object.
pub fn classify(frame: &Value) -> Option<FrameKind> {
    let obj = frame.as_object()?;
    let has_id = obj.get("id").is_some_and(|id| !id.is_null());
    if obj.get("method").is_some_and(Value::is_string) {
        return Some(if has_id {
            FrameKind::Request
        } else {
            FrameKind::Notification
        });
    }
    if has_id && (obj.contains_key("result") || obj.contains_key("error")) {
        return Some(FrameKind::Response);
    }
    None
}

/// True for a well-formed `initialize` request.
pub fn is_initialize_request(frame: &Value) -> bool {
    if classify(frame) != Some(FrameKind::Request) {
        return false;
    }
    match serde_json::from_value::<JsonRpcRequest>(frame.clone()) {
        Ok(request) => {
            request.validate().is_ok()
                && request.method == "initialize"
                && request.params.is_object()
        }
        Err(_) => false,
    }
}

/// Key for matching a response to its request. Numeric and string ids
/// stay distinct (`1` vs `"1"`).
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
