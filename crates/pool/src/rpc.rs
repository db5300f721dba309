//! Pool RPC surface
//!
//! Server side: [`PoolConnection`] adapts a [`PoolService`] to one RPC
//! connection, unwrapping the auth envelope (first params element), checking
//! the nonce, and dispatching with the verified caller id. Client side:
//! [`RemotePool`] implements [`Pool`] over a [`Remote`], signing an envelope
//! per call with the node's keypair.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use peerlink_crypto::Keypair;
use peerlink_rpc::{codes, Remote, RpcError, RpcFault, RpcHandler};
use peerlink_store::{Balance, StoreError};

use crate::api::{
    ConnectRequest, ConnectResponse, PeerRequest, PeerResponse, Pool, UpdateRequest,
    UpdateResponse,
};
use crate::envelope::AuthEnvelope;
use crate::service::PoolService;
use crate::{PoolError, Result};

/// Wire method names.
pub mod methods {
    pub const CONNECT: &str = "peerlink_connect";
    pub const UPDATE: &str = "peerlink_update";
    pub const PEER: &str = "peerlink_peer";
    pub const DISCONNECT: &str = "peerlink_disconnect";
    pub const WITHDRAW: &str = "peerlink_withdraw";
    /// Pool→agent: trust a matched client.
    pub const WHITELIST: &str = "peerlink_whitelist";
}

/// JSON-RPC error codes for pool failure kinds, so clients can react to the
/// kind (a stale nonce is retryable, a bad signature is not).
pub mod fault_codes {
    pub const INVALID_SIGNATURE: i32 = -32001;
    pub const INVALID_NONCE: i32 = -32002;
    pub const UNREGISTERED_NODE: i32 = -32003;
    pub const MALFORMED_NODE: i32 = -32004;
    pub const NOT_AUTHORIZED: i32 = -32005;
    pub const SECURITY_VIOLATION: i32 = -32006;
    pub const BAD_REQUEST: i32 = -32007;
}

fn fault_from_error(err: &PoolError) -> RpcFault {
    let code = match err {
        PoolError::InvalidSignature => fault_codes::INVALID_SIGNATURE,
        PoolError::Store(StoreError::InvalidNonce) => fault_codes::INVALID_NONCE,
        PoolError::Store(StoreError::UnregisteredNode) => fault_codes::UNREGISTERED_NODE,
        PoolError::Store(StoreError::MalformedNode) => fault_codes::MALFORMED_NODE,
        PoolError::Store(StoreError::NotAuthorized) => fault_codes::NOT_AUTHORIZED,
        PoolError::SecurityViolation(_) => fault_codes::SECURITY_VIOLATION,
        PoolError::BadRequest(_) => fault_codes::BAD_REQUEST,
        PoolError::Remote(_) => codes::INTERNAL_ERROR,
    };
    RpcFault::new(code, err.to_string())
}

fn error_from_fault(code: i32, message: String) -> PoolError {
    match code {
        fault_codes::INVALID_SIGNATURE => PoolError::InvalidSignature,
        fault_codes::INVALID_NONCE => PoolError::Store(StoreError::InvalidNonce),
        fault_codes::UNREGISTERED_NODE => PoolError::Store(StoreError::UnregisteredNode),
        fault_codes::MALFORMED_NODE => PoolError::Store(StoreError::MalformedNode),
        fault_codes::NOT_AUTHORIZED => PoolError::Store(StoreError::NotAuthorized),
        fault_codes::SECURITY_VIOLATION => PoolError::SecurityViolation(message),
        fault_codes::BAD_REQUEST => PoolError::BadRequest(message),
        _ => PoolError::Remote(RpcError::Fault { code, message }),
    }
}

/// Nanosecond wall-clock nonce; strictly increasing for any sane clock.
fn wall_nonce() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// One pool-side RPC connection.
pub struct PoolConnection {
    service: Arc<PoolService>,
    /// Bound after the connection's [`Remote`] is spawned, so a successful
    /// connect can register the channel for whitelist callbacks.
    remote: OnceLock<Remote>,
}

impl PoolConnection {
    pub fn new(service: Arc<PoolService>) -> Self {
        Self {
            service,
            remote: OnceLock::new(),
        }
    }

    pub fn bind_remote(&self, remote: Remote) {
        let _ = self.remote.set(remote);
    }

    /// Serve one stream: spawn a [`Remote`] wired to this pool.
    pub fn serve_stream<S>(service: Arc<PoolService>, stream: S) -> Remote
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Arc::new(PoolConnection::new(service));
        let remote = Remote::spawn(stream, connection.clone());
        connection.bind_remote(remote.clone());
        remote
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let params = params.unwrap_or(serde_json::Value::Null);
        let list = params
            .as_array()
            .ok_or_else(|| PoolError::BadRequest("params must be an array".to_string()))?;
        let envelope: AuthEnvelope = serde_json::from_value(
            list.first()
                .cloned()
                .ok_or_else(|| PoolError::BadRequest("missing auth envelope".to_string()))?,
        )
        .map_err(|e| PoolError::BadRequest(format!("auth envelope: {e}")))?;
        let args = list.get(1).cloned().unwrap_or(serde_json::Value::Null);

        let caller = envelope.verify(method, &args)?;
        self.service
            .store()
            .check_and_save_nonce(&caller, envelope.nonce)?;
        debug!(node = %caller, method, "authenticated call");

        match method {
            methods::CONNECT => {
                let req: ConnectRequest = parse_args(args)?;
                let resp = self.service.connect(caller, req).await?;
                if let Some(remote) = self.remote.get() {
                    self.service.attach_agent(caller, remote.clone());
                }
                to_result(resp)
            }
            methods::UPDATE => {
                let req: UpdateRequest = parse_args(args)?;
                to_result(self.service.update(caller, req).await?)
            }
            methods::PEER => {
                let req: PeerRequest = parse_args(args)?;
                to_result(self.service.peer(caller, req).await?)
            }
            methods::DISCONNECT => {
                self.service.disconnect(caller).await?;
                Ok(serde_json::Value::Null)
            }
            methods::WITHDRAW => to_result(self.service.withdraw(caller).await?),
            // Unknown methods are rejected before auth; unreachable here.
            _ => Err(PoolError::BadRequest(format!("unknown method {method}"))),
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| PoolError::BadRequest(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| PoolError::BadRequest(e.to_string()))
}

impl RpcHandler for PoolConnection {
    fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, RpcFault>> + Send + '_>>
    {
        let method = method.to_string();
        Box::pin(async move {
            let known = matches!(
                method.as_str(),
                methods::CONNECT
                    | methods::UPDATE
                    | methods::PEER
                    | methods::DISCONNECT
                    | methods::WITHDRAW
            );
            if !known {
                return Err(RpcFault::method_not_found(&method));
            }
            self.dispatch(&method, params)
                .await
                .map_err(|e| fault_from_error(&e))
        })
    }
}

/// Client-side pool: signs an envelope per call and decodes typed responses.
pub struct RemotePool {
    remote: Remote,
    keypair: Keypair,
}

impl RemotePool {
    pub fn new(remote: Remote, keypair: Keypair) -> Self {
        Self { remote, keypair }
    }

    async fn call_signed<R: DeserializeOwned>(
        &self,
        method: &str,
        args: serde_json::Value,
    ) -> Result<R> {
        let envelope = AuthEnvelope::sign(&self.keypair, method, wall_nonce(), &args)?;
        let params = serde_json::json!([envelope, args]);

        match self.remote.call(method, Some(params)).await {
            Ok(result) => serde_json::from_value(result)
                .map_err(|e| PoolError::BadRequest(format!("bad response: {e}"))),
            Err(RpcError::Fault { code, message }) => Err(error_from_fault(code, message)),
            Err(e) => Err(PoolError::Remote(e)),
        }
    }
}

#[async_trait]
impl Pool for RemotePool {
    async fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse> {
        self.call_signed(methods::CONNECT, to_result(req)?).await
    }

    async fn update(&self, req: UpdateRequest) -> Result<UpdateResponse> {
        self.call_signed(methods::UPDATE, to_result(req)?).await
    }

    async fn peer(&self, req: PeerRequest) -> Result<PeerResponse> {
        self.call_signed(methods::PEER, to_result(req)?).await
    }

    async fn disconnect(&self) -> Result<()> {
        let _: serde_json::Value = self
            .call_signed(methods::DISCONNECT, serde_json::Value::Null)
            .await?;
        Ok(())
    }

    async fn withdraw(&self) -> Result<Balance> {
        self.call_signed(methods::WITHDRAW, serde_json::Value::Null)
            .await
    }
}
