//! PeerLink pool
//!
//! The coordination service clients and hosts register with. The pool owns
//! matchmaking (picking active hosts for a client), liveness bookkeeping,
//! and balance accrual for active peering, all backed by a
//! [`peerlink_store::Store`].
//!
//! Every RPC call into the pool carries an [`AuthEnvelope`] binding the call
//! to a node identity; the handler sees the verified caller id as ambient
//! context. [`RemotePool`] is the client-side counterpart, signing envelopes
//! with the node's keypair.

mod api;
mod balance;
mod envelope;
mod rpc;
mod service;

pub use api::{
    ConnectRequest, ConnectResponse, HostCandidate, PeerRequest, PeerResponse, Pool,
    UpdateRequest, UpdateResponse,
};
pub use envelope::AuthEnvelope;
pub use rpc::{fault_codes, methods, PoolConnection, RemotePool};
pub use service::{PoolConfig, PoolService};

use peerlink_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("remote error: {0}")]
    Remote(#[from] peerlink_rpc::RpcError),
}

impl PoolError {
    /// True for the nonce failure a client may retry with a fresh nonce.
    pub fn is_invalid_nonce(&self) -> bool {
        matches!(self, PoolError::Store(StoreError::InvalidNonce))
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
