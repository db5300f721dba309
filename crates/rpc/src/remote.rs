//! Bidirectional JSON-RPC peer
//!
//! A [`Remote`] wraps one end of a byte stream. It spawns a read task that
//! dispatches incoming requests to the supplied [`RpcHandler`] and routes
//! incoming responses to pending calls, plus a write task that serializes
//! outgoing lines. Either side of a connection can therefore act as client
//! and server at once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{codes, RpcFault, RpcRequest, RpcResponse};
use crate::{RpcError, Result};

/// Serves incoming requests on a connection.
///
/// Implementations return the raw JSON result, or an [`RpcFault`] that is
/// sent back verbatim so callers can match on the error code.
pub trait RpcHandler: Send + Sync {
    fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, RpcFault>> + Send + '_>>;
}

impl<T: RpcHandler + ?Sized> RpcHandler for Arc<T> {
    fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, RpcFault>> + Send + '_>>
    {
        (**self).handle(method, params)
    }
}

/// Handler for pure clients: rejects every incoming request.
pub struct NullHandler;

impl RpcHandler for NullHandler {
    fn handle(
        &self,
        method: &str,
        _params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, RpcFault>> + Send + '_>>
    {
        let method = method.to_string();
        Box::pin(async move { Err(RpcFault::method_not_found(&method)) })
    }
}

/// Outstanding calls, plus whether the connection is already known dead.
/// One mutex for both, so a call can never enqueue on a dead connection.
#[derive(Default)]
struct Pending {
    slots: HashMap<u64, oneshot::Sender<RpcResponse>>,
    closed: bool,
}

impl Pending {
    fn shutdown(&mut self) {
        self.closed = true;
        self.slots.clear();
    }
}

type PendingMap = Arc<Mutex<Pending>>;

/// Background tasks for one connection; aborted when the last clone drops.
struct ConnectionTasks {
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl Drop for ConnectionTasks {
    fn drop(&mut self) {
        self.read.abort();
        self.write.abort();
    }
}

/// One end of a JSON-RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct Remote {
    out_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    tasks: Arc<ConnectionTasks>,
}

impl Remote {
    /// Take ownership of a stream and start serving it.
    pub fn spawn<S, H>(stream: S, handler: H) -> Remote
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: RpcHandler + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let pending: PendingMap = Arc::new(Mutex::new(Pending::default()));

        let write_task = tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let handler = Arc::new(handler);
        let read_pending = pending.clone();
        let read_out_tx = out_tx.clone();
        let read_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("read error: {}", e);
                        break;
                    }
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                dispatch_line(trimmed, &handler, &read_out_tx, &read_pending);
            }
            // Connection gone: wake every outstanding call with a closed
            // error and refuse new ones.
            read_pending.lock().shutdown();
        });

        Remote {
            out_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            tasks: Arc::new(ConnectionTasks {
                read: read_task,
                write: write_task,
            }),
        }
    }

    /// Issue a call and wait for the matching response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let line = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(RpcError::ConnectionClosed);
            }
            pending.slots.insert(id, tx);
        }

        if self.out_tx.send(line).await.is_err() {
            self.pending.lock().slots.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        let response = rx.await.map_err(|_| RpcError::ConnectionClosed)?;
        if let Some(fault) = response.error {
            return Err(fault.into());
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Shut the connection down, failing any outstanding calls.
    pub fn close(&self) {
        self.tasks.read.abort();
        self.tasks.write.abort();
        self.pending.lock().shutdown();
    }
}

fn dispatch_line<H: RpcHandler + 'static>(
    line: &str,
    handler: &Arc<H>,
    out_tx: &mpsc::Sender<String>,
    pending: &PendingMap,
) {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("unparseable message: {}", e);
            respond(
                out_tx.clone(),
                RpcResponse::failure(
                    serde_json::Value::Null,
                    RpcFault::new(codes::PARSE_ERROR, format!("parse error: {e}")),
                ),
            );
            return;
        }
    };

    if value.get("method").is_some() {
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                respond(
                    out_tx.clone(),
                    RpcResponse::failure(
                        serde_json::Value::Null,
                        RpcFault::new(codes::INVALID_REQUEST, format!("invalid request: {e}")),
                    ),
                );
                return;
            }
        };
        let handler = handler.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let id = serde_json::json!(request.id);
            let response = match handler.handle(&request.method, request.params).await {
                Ok(result) => RpcResponse::success(id, result),
                Err(fault) => RpcResponse::failure(id, fault),
            };
            if let Ok(line) = serde_json::to_string(&response) {
                let _ = out_tx.send(line).await;
            }
        });
        return;
    }

    match serde_json::from_value::<RpcResponse>(value) {
        Ok(response) => {
            let slot = response
                .id
                .as_u64()
                .and_then(|id| pending.lock().slots.remove(&id));
            match slot {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!("response for unknown call id {:?}", response.id),
            }
        }
        Err(e) => warn!("message is neither request nor response: {}", e),
    }
}

fn respond(out_tx: mpsc::Sender<String>, response: RpcResponse) {
    tokio::spawn(async move {
        if let Ok(line) = serde_json::to_string(&response) {
            let _ = out_tx.send(line).await;
        }
    });
}

/// Create a connected pair of in-memory remotes. Calls issued on the first
/// remote are served by `handler_b` and vice versa.
pub fn pipe<HA, HB>(handler_a: HA, handler_b: HB) -> (Remote, Remote)
where
    HA: RpcHandler + 'static,
    HB: RpcHandler + 'static,
{
    let (a, b) = tokio::io::duplex(64 * 1024);
    (Remote::spawn(a, handler_a), Remote::spawn(b, handler_b))
}
