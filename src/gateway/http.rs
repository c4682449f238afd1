// Nuclino MCP — HTTP Transport
//
// Streamable-HTTP style endpoint on `/mcp`:
//   POST   one JSON-RPC frame in; requests get their response as JSON,
//          notifications and client responses get 202
//   GET    server-to-client frames as SSE (one subscriber per session)
//   DELETE end the session
// plus `/health` for readiness probes.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::error::{GatewayError, Rejection};
use super::protocol::{self, FrameKind, JsonRpcResponse, BAD_REQUEST, INTERNAL_ERROR, INVALID_REQUEST};
use super::session::{Session, SessionRegistry};
use crate::upstream::ApiKey;

pub const SESSION_ID_HEADER: &str = "mcp-session-id";
pub const API_KEY_HEADER: &str = "nuclino-api-key";

#[derive(Clone)]
pub struct HttpGateway {
    registry: Arc<SessionRegistry>,
}

impl HttpGateway {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", post(post_mcp).get(get_mcp).delete(delete_mcp))
            .route("/health", get(health))
            .with_state(self.registry.clone())
    }

    /// Serve until `shutdown` resolves. Every session is closed before
    /// in-flight connections are drained, which also ends open SSE streams.
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Nuclino MCP HTTP gateway listening");

        let registry = self.registry.clone();
        let shutdown = async move {
            shutdown.await;
            registry.close_all().await;
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Sessions created while draining.
        self.registry.close_all().await;
        tracing::info!("HTTP gateway stopped");
        Ok(())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn rpc_error(status: StatusCode, body: JsonRpcResponse) -> Response {
    (status, Json(body)).into_response()
}

fn rejection_response(rejection: &Rejection) -> Response {
    if rejection.is_configuration() {
        tracing::warn!("Session creation refused: no API key");
    } else {
        tracing::warn!(reason = ?rejection, "MCP request rejected");
    }
    rpc_error(
        StatusCode::BAD_REQUEST,
        JsonRpcResponse::error(Value::Null, BAD_REQUEST, rejection.to_string()),
    )
}

fn with_session_header(mut response: Response, session: &Session) -> Response {
    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn post_mcp(
    State(registry): State<Arc<SessionRegistry>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session_id = header(&headers, SESSION_ID_HEADER);
    let credential = header(&headers, API_KEY_HEADER).map(ApiKey::new);
    tracing::info!(
        session_id = session_id.unwrap_or("-"),
        has_api_key = credential.is_some(),
        user_agent = header(&headers, "user-agent").unwrap_or("-"),
        "Received MCP request"
    );

    let frame: Value = match serde_json::from_slice(&body) {
        Ok(frame) => frame,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::parse_error(format!("Parse error: {e}")),
            )
        }
    };
    if frame.is_array() {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "Batch requests are not supported"),
        );
    }
    let Some(kind) = protocol::classify(&frame) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "Invalid JSON-RPC message"),
        );
    };

    let created = session_id.is_none();
    let session = match registry.get_or_create(session_id, credential, &frame).await {
        Ok(session) => session,
        Err(rejection) => return rejection_response(&rejection),
    };

    let response = match kind {
        FrameKind::Request => {
            let id = frame.get("id").cloned().unwrap_or(Value::Null);
            match session.dispatch(frame).await {
                Ok(reply) => {
                    // A failed initialize leaves nothing worth keeping.
                    if created && reply.get("error").is_some() {
                        registry.close(session.id()).await;
                    }
                    Json(reply).into_response()
                }
                Err(e) => {
                    tracing::error!(session_id = %session.id(), error = %e, "Session dispatch failed");
                    if created {
                        registry.close(session.id()).await;
                    }
                    rpc_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {e}")),
                    )
                }
            }
        }
        FrameKind::Notification | FrameKind::Response => match session.send(&frame).await {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "Session forward failed");
                rpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    JsonRpcResponse::error(Value::Null, INTERNAL_ERROR, format!("Internal error: {e}")),
                )
            }
        },
    };
    with_session_header(response, &session)
}

fn invalid_session() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response()
}

async fn get_mcp(State(registry): State<Arc<SessionRegistry>>, headers: HeaderMap) -> Response {
    let Some(session) = header(&headers, SESSION_ID_HEADER).and_then(|id| registry.get(id)) else {
        return invalid_session();
    };
    let Some(frames) = session.stream().subscribe() else {
        return (StatusCode::CONFLICT, "An SSE stream is already open for this session")
            .into_response();
    };
    tracing::info!(session_id = %session.id(), "SSE stream attached");

    let events = stream::unfold(frames, |mut frames| async move {
        let frame = frames.recv().await?;
        let event = Event::default()
            .event("message")
            .json_data(&frame)
            .unwrap_or_else(|_| Event::default().comment("unencodable frame"));
        Some((Ok::<_, Infallible>(event), frames))
    });

    let response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    with_session_header(response, &session)
}

async fn delete_mcp(State(registry): State<Arc<SessionRegistry>>, headers: HeaderMap) -> Response {
    match header(&headers, SESSION_ID_HEADER) {
        Some(id) if registry.close(id).await => StatusCode::OK.into_response(),
        _ => invalid_session(),
    }
}

async fn health(State(registry): State<Arc<SessionRegistry>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": registry.len(),
    }))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use reqwest::Url;
    use tower::ServiceExt;

    use super::*;
    use crate::upstream::{RetryConfig, UpstreamSettings};

    fn gateway_for(base_url: &str) -> (HttpGateway, Arc<SessionRegistry>) {
        let mut settings = UpstreamSettings::new(Url::parse(base_url).unwrap());
        settings.retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        let registry = Arc::new(SessionRegistry::new(settings).unwrap());
        (HttpGateway::new(registry.clone()), registry)
    }

    fn initialize() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }
        })
    }

    fn post(body: &Value, session: Option<&str>, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_ID_HEADER, session);
        }
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn bare(method: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/mcp");
        if let Some(session) = session {
            builder = builder.header(SESSION_ID_HEADER, session);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Initialize over HTTP and return the new session id.
    async fn open_session(router: &Router, key: &str) -> String {
        let response = router
            .clone()
            .oneshot(post(&initialize(), None, Some(key)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();

        let initialized = json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        let response = router
            .clone()
            .oneshot(post(&initialized, Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        id
    }

    #[tokio::test]
    async fn test_initialize_creates_session() {
        let (gateway, registry) = gateway_for("http://127.0.0.1:9");
        let router = gateway.router();

        let response = router
            .clone()
            .oneshot(post(&initialize(), None, Some("key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(SESSION_ID_HEADER));

        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["serverInfo"]["name"], "nuclino-server");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_without_key_is_rejected() {
        let (gateway, registry) = gateway_for("http://127.0.0.1:9");

        let response = gateway
            .router()
            .oneshot(post(&initialize(), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Bad Request: Nuclino API key is required");
        assert!(body["id"].is_null());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_request_without_session_is_rejected() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let list = json!({"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}});

        let response = gateway
            .router()
            .oneshot(post(&list, None, Some("key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Bad Request: No valid session ID provided");
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let list = json!({"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}});

        let response = gateway
            .router()
            .oneshot(post(&list, Some("does-not-exist"), Some("key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_parse_error() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("{not json"))
            .unwrap();

        let response = gateway.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_batch_is_refused() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let response = gateway
            .router()
            .oneshot(post(&json!([initialize()]), None, Some("key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_tool_call_through_session() {
        let mut server = mockito::Server::new_async().await;
        let teams = server
            .mock("GET", "/v0/teams")
            .match_header("authorization", "key-1")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"results":[{"id":"t1","name":"Eng"}]}}"#)
            .expect(1)
            .create_async()
            .await;

        let (gateway, _) = gateway_for(&server.url());
        let router = gateway.router();
        let id = open_session(&router, "key-1").await;

        let call = json!({
            "jsonrpc": "2.0", "id": 5, "method": "tools/call",
            "params": {"name": "get_teams", "arguments": {}}
        });
        let response = router
            .clone()
            .oneshot(post(&call, Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], 5);
        assert!(body["result"]["content"][0]["text"].as_str().unwrap().contains("Eng"));
        teams.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_ends_session() {
        let (gateway, registry) = gateway_for("http://127.0.0.1:9");
        let router = gateway.router();
        let id = open_session(&router, "key").await;

        let response = router.clone().oneshot(bare("DELETE", Some(&id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.is_empty());

        let list = json!({"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}});
        let response = router
            .clone()
            .oneshot(post(&list, Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router.oneshot(bare("DELETE", Some(&id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_and_delete_need_a_session() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let router = gateway.router();

        for method in ["GET", "DELETE"] {
            let response = router.clone().oneshot(bare(method, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let response = router
                .clone()
                .oneshot(bare(method, Some("unknown")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_second_sse_subscriber_conflicts() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let router = gateway.router();
        let id = open_session(&router, "key").await;

        let first = router.clone().oneshot(bare("GET", Some(&id))).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["content-type"], "text/event-stream");

        let second = router.clone().oneshot(bare("GET", Some(&id))).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        drop(first);
        let third = router.oneshot(bare("GET", Some(&id))).await.unwrap();
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let (gateway, _) = gateway_for("http://127.0.0.1:9");
        let router = gateway.router();
        open_session(&router, "key").await;

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
    }
}
