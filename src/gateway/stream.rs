// Nuclino MCP — Session Stream Endpoint
//
// Each session owns one in-process stream endpoint: a duplex pipe with
// an rmcp service on the far end. Frames go in as newline-delimited
// JSON. Responses to requests the gateway is waiting on are routed back
// to the waiter; everything else (notifications, server-initiated
// requests, responses nobody asked for) is queued for whichever
// subscriber is attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rmcp::ServiceExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::error::StreamError;
use super::protocol::{self, FrameKind};
use crate::mcp::NuclinoServer;

const PIPE_CAPACITY: usize = 64 * 1024;
const OUTBOUND_CAPACITY: usize = 256;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;
type OutboundSlot = Arc<Mutex<Option<mpsc::Receiver<Value>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SessionStream {
    writer: tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>,
    pending: Pending,
    outbound: OutboundSlot,
    closed: CancellationToken,
}

impl SessionStream {
    /// Start `server` on a fresh pipe. Must be called inside a tokio
    /// runtime. `closed` fires once the endpoint is gone, whoever closed it.
    pub fn open(server: NuclinoServer, closed: CancellationToken) -> Self {
        let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_read, client_write) = tokio::io::split(client_io);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        tokio::spawn(run_server(server, server_io, closed.clone()));
        tokio::spawn(read_frames(
            client_read,
            pending.clone(),
            outbound_tx,
            closed.clone(),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Some(client_write)),
            pending,
            outbound: Arc::new(Mutex::new(Some(outbound_rx))),
            closed,
        }
    }

    /// Send a request frame and wait for the matching response.
    pub async fn request(&self, frame: Value) -> Result<Value, StreamError> {
        let key = frame
            .get("id")
            .filter(|id| !id.is_null())
            .map(protocol::id_key)
            .ok_or(StreamError::MissingId)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&key) {
                return Err(StreamError::DuplicateRequestId(key));
            }
            pending.insert(key.clone(), tx);
        }

        if let Err(e) = self.forward(&frame).await {
            lock(&self.pending).remove(&key);
            return Err(e);
        }

        tokio::select! {
            biased;
            response = rx => response.map_err(|_| StreamError::Closed),
            _ = self.closed.cancelled() => {
                lock(&self.pending).remove(&key);
                Err(StreamError::Closed)
            }
        }
    }

    /// Write a frame without waiting for anything back.
    pub async fn forward(&self, frame: &Value) -> Result<(), StreamError> {
        if self.closed.is_cancelled() {
            return Err(StreamError::Closed);
        }
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let pipe = writer.as_mut().ok_or(StreamError::Closed)?;
        pipe.write_all(line.as_bytes()).await?;
        pipe.flush().await?;
        Ok(())
    }

    /// Attach as the single consumer of unsolicited frames. `None` while
    /// another subscriber holds them.
    pub fn subscribe(&self) -> Option<OutboundFrames> {
        let rx = lock(&self.outbound).take()?;
        Some(OutboundFrames {
            rx: Some(rx),
            slot: self.outbound.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close the endpoint. Waiters get `StreamError::Closed` and the
    /// subscriber stream ends.
    pub async fn close(&self) {
        self.closed.cancel();
        self.writer.lock().await.take();
        lock(&self.pending).clear();
    }
}

/// Unsolicited frames for one subscriber. Dropping it detaches the
/// subscriber and lets the next one attach.
pub struct OutboundFrames {
    rx: Option<mpsc::Receiver<Value>>,
    slot: OutboundSlot,
}

impl OutboundFrames {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.as_mut()?.recv().await
    }
}

impl Drop for OutboundFrames {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            *lock(&self.slot) = Some(rx);
        }
    }
}

async fn run_server(server: NuclinoServer, io: DuplexStream, closed: CancellationToken) {
    let transport = tokio::io::split(io);

    // `serve` completes the initialize handshake before returning.
    let service = tokio::select! {
        result = server.serve(transport) => match result {
            Ok(service) => service,
            Err(e) => {
                tracing::warn!(error = %e, "MCP handshake failed");
                closed.cancel();
                return;
            }
        },
        _ = closed.cancelled() => return,
    };

    let service_token = service.cancellation_token();
    tokio::select! {
        result = service.waiting() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "MCP service stopped with error");
            }
        }
        _ = closed.cancelled() => service_token.cancel(),
    }
    closed.cancel();
}

async fn read_frames(
    read: ReadHalf<DuplexStream>,
    pending: Pending,
    outbound: mpsc::Sender<Value>,
    closed: CancellationToken,
) {
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => route_frame(&line, &pending, &outbound),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Session stream read failed");
                break;
            }
        }
    }
    closed.cancel();
    lock(&pending).clear();
}

fn route_frame(line: &str, pending: &Pending, outbound: &mpsc::Sender<Value>) {
    let frame: Value = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping unparseable frame from MCP service");
            return;
        }
    };

    if protocol::classify(&frame) == Some(FrameKind::Response) {
        let waiter = frame
            .get("id")
            .map(protocol::id_key)
            .and_then(|key| lock(pending).remove(&key));
        if let Some(waiter) = waiter {
            // The waiter may have given up; nothing to do then.
            let _ = waiter.send(frame);
            return;
        }
    }

    if let Err(e) = outbound.try_send(frame) {
        tracing::debug!(error = %e, "Outbound queue unavailable, frame dropped");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
