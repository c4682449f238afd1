// Nuclino MCP — Session Registry
//
// Maps session ids to live sessions. Each session owns its own upstream
// client (credential, rate-limit window, retry policy) and its own MCP
// stream endpoint, so no state is shared between sessions. Lookups take
// the map lock briefly; nothing awaits while holding it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{GatewayError, Rejection, StreamError};
use super::protocol;
use super::stream::SessionStream;
use crate::mcp::NuclinoServer;
use crate::upstream::{ApiKey, UpstreamClient, UpstreamSettings};

type SessionMap = HashMap<String, Arc<Session>>;

fn read(map: &RwLock<SessionMap>) -> RwLockReadGuard<'_, SessionMap> {
    map.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(map: &RwLock<SessionMap>) -> RwLockWriteGuard<'_, SessionMap> {
    map.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One client's gateway state.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    upstream: Arc<UpstreamClient>,
    stream: SessionStream,
    // Requests within a session are handed to the stream one at a time,
    // in arrival order.
    turn: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    pub fn stream(&self) -> &SessionStream {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    /// Replace the credential used for this session's next upstream calls.
    pub async fn update_credential(&self, credential: ApiKey) {
        self.upstream.update_credential(credential).await;
    }

    /// Hand a request to the session's MCP service and wait for its answer.
    pub async fn dispatch(&self, frame: Value) -> Result<Value, StreamError> {
        let _turn = self.turn.lock().await;
        self.stream.request(frame).await
    }

    /// Hand a notification or response to the MCP service.
    pub async fn send(&self, frame: &Value) -> Result<(), StreamError> {
        self.stream.forward(frame).await
    }

    async fn close(&self) {
        self.stream.close().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct SessionRegistry {
    settings: UpstreamSettings,
    http: reqwest::Client,
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    pub fn new(settings: UpstreamSettings) -> Result<Self, GatewayError> {
        let http = settings.http_client()?;
        Ok(Self {
            settings,
            http,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Resolve the session an inbound frame belongs to.
    ///
    /// - a known id resolves to its session, adopting `credential` if given
    /// - an unknown id is rejected
    /// - no id plus an initialize request creates a session, but only with
    ///   a credential
    /// - no id on anything else is rejected
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
        credential: Option<ApiKey>,
        frame: &Value,
    ) -> Result<Arc<Session>, Rejection> {
        if let Some(id) = session_id {
            let session = self
                .get(id)
                .ok_or_else(|| Rejection::UnknownSession(id.to_string()))?;
            if let Some(credential) = credential {
                session.update_credential(credential).await;
            }
            return Ok(session);
        }

        if !protocol::is_initialize_request(frame) {
            return Err(Rejection::MissingSessionId);
        }
        let credential = credential.ok_or(Rejection::MissingCredential)?;
        Ok(self.create(credential))
    }

    /// Create and register a session for `credential`. The stdio transport
    /// calls this directly at startup.
    pub fn create(&self, credential: ApiKey) -> Arc<Session> {
        let upstream = Arc::new(UpstreamClient::new(
            self.http.clone(),
            &self.settings,
            credential,
        ));
        let closed = CancellationToken::new();
        let stream = SessionStream::open(NuclinoServer::new(upstream.clone()), closed.clone());

        let session = {
            let mut sessions = write(&self.sessions);
            let mut id = Uuid::new_v4().to_string();
            while sessions.contains_key(&id) {
                id = Uuid::new_v4().to_string();
            }
            let session = Arc::new(Session {
                id: id.clone(),
                created_at: Utc::now(),
                upstream,
                stream,
                turn: tokio::sync::Mutex::new(()),
            });
            sessions.insert(id, session.clone());
            session
        };

        tracing::info!(session_id = %session.id, "Session initialized");
        tokio::spawn(forget_when_closed(
            Arc::downgrade(&self.sessions),
            session.id.clone(),
            closed,
        ));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        read(&self.sessions).get(id).cloned()
    }

    /// Close and forget a session. Returns false if the id was unknown.
    pub async fn close(&self, id: &str) -> bool {
        let removed = write(&self.sessions).remove(id);
        match removed {
            Some(session) => {
                session.close().await;
                tracing::info!(session_id = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Close every live session.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = write(&self.sessions).drain().map(|(_, s)| s).collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "Closing all sessions");
        for session in drained {
            session.close().await;
        }
    }

    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.sessions).is_empty()
    }
}

// A session whose stream ends on its own (service stopped, pipe broke)
// is removed from the map.
async fn forget_when_closed(sessions: Weak<RwLock<SessionMap>>, id: String, closed: CancellationToken) {
    closed.cancelled().await;
    if let Some(sessions) = sessions.upgrade() {
        if write(&sessions).remove(&id).is_some() {
            tracing::info!(session_id = %id, "Session stream ended, session removed");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::Matcher;
    use reqwest::Url;
    use serde_json::json;

    use super::*;
    use crate::upstream::RetryConfig;

    fn registry_for(base_url: &str) -> SessionRegistry {
        let mut settings = UpstreamSettings::new(Url::parse(base_url).unwrap());
        settings.retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        SessionRegistry::new(settings).unwrap()
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

    fn tools_list() -> Value {
        json!({"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}})
    }

    async fn start(registry: &SessionRegistry, key: &str) -> Arc<Session> {
        let session = registry
            .get_or_create(None, Some(ApiKey::new(key)), &initialize())
            .await
            .unwrap();
        session.dispatch(initialize()).await.unwrap();
        session
            .send(&json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_initialize_without_credential_is_rejected() {
        let registry = registry_for("http://127.0.0.1:9");
        let err = registry
            .get_or_create(None, None, &initialize())
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::MissingCredential);
        assert!(err.is_configuration());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_session_id_is_rejected() {
        let registry = registry_for("http://127.0.0.1:9");
        let err = registry
            .get_or_create(None, Some(ApiKey::new("k")), &tools_list())
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::MissingSessionId);
        assert!(!err.is_configuration());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let registry = registry_for("http://127.0.0.1:9");
        let err = registry
            .get_or_create(Some("nope"), Some(ApiKey::new("k")), &tools_list())
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::UnknownSession("nope".to_string()));
        assert_eq!(err.to_string(), "Bad Request: No valid session ID provided");
    }

    #[tokio::test]
    async fn test_create_then_lookup() {
        let registry = registry_for("http://127.0.0.1:9");
        let session = start(&registry, "k").await;

        assert_eq!(registry.len(), 1);
        let found = registry
            .get_or_create(Some(session.id()), None, &tools_list())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert!(Uuid::parse_str(session.id()).is_ok());
    }

    #[tokio::test]
    async fn test_session_ids_are_distinct() {
        let registry = registry_for("http://127.0.0.1:9");
        let a = registry.create(ApiKey::new("a"));
        let b = registry.create(ApiKey::new("b"));
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_close_removes_session() {
        let registry = registry_for("http://127.0.0.1:9");
        let session = start(&registry, "k").await;
        let id = session.id().to_string();

        assert!(registry.close(&id).await);
        assert!(session.is_closed());
        assert!(registry.get(&id).is_none());
        assert!(!registry.close(&id).await);

        let err = registry
            .get_or_create(Some(&id), None, &tools_list())
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::UnknownSession(id));
    }

    #[tokio::test]
    async fn test_stream_close_signal_removes_session() {
        let registry = registry_for("http://127.0.0.1:9");
        let session = start(&registry, "k").await;
        let id = session.id().to_string();

        session.stream().closed_token().cancel();
        for _ in 0..100 {
            if registry.get(&id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(registry.get(&id).is_none());
        assert_eq!(registry.len(), 0);
        let err = registry
            .get_or_create(Some(&id), None, &tools_list())
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::UnknownSession(id));
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = registry_for("http://127.0.0.1:9");
        let a = registry.create(ApiKey::new("a"));
        let b = registry.create(ApiKey::new("b"));

        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_sessions_use_their_own_credentials() {
        let mut server = mockito::Server::new_async().await;
        let alpha = server
            .mock("GET", "/v0/teams")
            .match_header("authorization", "key-alpha")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"results":[{"id":"t-a","name":"Alpha"}]}}"#)
            .expect(1)
            .create_async()
            .await;
        let beta = server
            .mock("GET", "/v0/teams")
            .match_header("authorization", "key-beta")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"results":[{"id":"t-b","name":"Beta"}]}}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = registry_for(&server.url());
        let a = start(&registry, "key-alpha").await;
        let b = start(&registry, "key-beta").await;

        let call = json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "get_teams", "arguments": {}}
        });
        let (ra, rb) = tokio::join!(a.dispatch(call.clone()), b.dispatch(call));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert!(ra["result"]["content"][0]["text"].as_str().unwrap().contains("t-a"));
        assert!(rb["result"]["content"][0]["text"].as_str().unwrap().contains("t-b"));
        assert_eq!(a.upstream().request_count().await, 1);
        assert_eq!(b.upstream().request_count().await, 1);
        alpha.assert_async().await;
        beta.assert_async().await;
    }

    #[tokio::test]
    async fn test_closing_one_session_leaves_others_working() {
        let mut server = mockito::Server::new_async().await;
        let _teams = server
            .mock("GET", "/v0/teams")
            .with_status(200)
            .with_body(r#"{"results":[]}"#)
            .create_async()
            .await;

        let registry = registry_for(&server.url());
        let a = start(&registry, "a").await;
        let b = start(&registry, "b").await;

        registry.close(a.id()).await;

        let response = b.dispatch(tools_list()).await.unwrap();
        assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 7);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_new_credential_replaces_stored_one() {
        let mut server = mockito::Server::new_async().await;
        let rotated = server
            .mock("GET", "/v0/workspaces")
            .match_header("authorization", Matcher::Exact("rotated".into()))
            .with_status(200)
            .with_body(r#"{"results":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = registry_for(&server.url());
        let session = start(&registry, "original").await;

        registry
            .get_or_create(Some(session.id()), Some(ApiKey::new("rotated")), &tools_list())
            .await
            .unwrap();

        let call = json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "get_workspaces", "arguments": {}}
        });
        let response = session.dispatch(call).await.unwrap();
        assert_ne!(response["result"]["isError"], true);
        rotated.assert_async().await;
    }
}
