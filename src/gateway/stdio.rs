// Nuclino MCP — Stdio Transport
//
// A single session for the life of the process. Newline-delimited
// JSON-RPC frames arrive on stdin. Requests are dispatched one at a time
// and their replies written to stdout in order; frames the session emits
// on its own are interleaved between them. Logs stay on stderr so stdout
// carries protocol only.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::error::{GatewayError, StreamError};
use super::protocol::{self, FrameKind, JsonRpcResponse, INTERNAL_ERROR};
use super::session::SessionRegistry;
use crate::upstream::ApiKey;

// A full stdout queue stalls the reader; nothing is dropped.
const STDOUT_CAPACITY: usize = 64;

pub struct StdioGateway {
    registry: Arc<SessionRegistry>,
    credential: ApiKey,
}

impl StdioGateway {
    pub fn new(registry: Arc<SessionRegistry>, credential: ApiKey) -> Self {
        Self {
            registry,
            credential,
        }
    }

    /// Serve on the process's stdin and stdout.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), GatewayError> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    /// Serve on arbitrary byte streams. Returns on input EOF, on
    /// `shutdown`, or when the session's stream ends.
    pub async fn run_with<R, W>(
        self,
        input: R,
        output: W,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), GatewayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session = self.registry.create(self.credential);
        tracing::info!(session_id = %session.id(), "Nuclino MCP server running on stdio");

        let (stdout_tx, mut stdout_rx) = mpsc::channel::<Value>(STDOUT_CAPACITY);
        let writer = tokio::spawn(async move {
            let mut output = output;
            while let Some(frame) = stdout_rx.recv().await {
                if let Err(e) = write_frame(&mut output, &frame).await {
                    tracing::error!(error = %e, "Failed to write to stdout");
                    break;
                }
            }
        });

        let mut unsolicited = session.stream().subscribe().ok_or(StreamError::Closed)?;
        let relay_tx = stdout_tx.clone();
        let relay = tokio::spawn(async move {
            while let Some(frame) = unsolicited.recv().await {
                if relay_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let closed = session.stream().closed_token();
        let mut lines = BufReader::new(input).lines();
        tokio::pin!(shutdown);
        loop {
            let line = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = closed.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("Stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read from stdin");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let frame: Value = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unparseable stdin frame");
                    continue;
                }
            };

            if protocol::classify(&frame) != Some(FrameKind::Request) {
                if let Err(e) = session.send(&frame).await {
                    tracing::error!(error = %e, "Session forward failed");
                    break;
                }
                continue;
            }

            let id = frame.get("id").cloned().unwrap_or(Value::Null);
            let result = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                result = session.dispatch(frame) => result,
            };
            let reply = match result {
                Ok(reply) => reply,
                Err(StreamError::Closed) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Session dispatch failed");
                    let error = JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {e}"));
                    match serde_json::to_value(error) {
                        Ok(reply) => reply,
                        Err(_) => continue,
                    }
                }
            };
            if stdout_tx.send(reply).await.is_err() {
                break;
            }
        }

        self.registry.close_all().await;
        drop(stdout_tx);
        let _ = relay.await;
        let _ = writer.await;
        Ok(())
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(output: &mut W, frame: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

// ─── Tests ───────────────────────────────────────────────────────────────────
