//! PeerLink RPC
//!
//! JSON-RPC 2.0 over a bidirectional byte stream. Unlike a plain
//! client/server split, both ends of a pipe can issue calls: an agent calls
//! `peerlink_update` on the pool, and the pool calls `peerlink_whitelist`
//! back on the same connection. [`Remote`] owns one end of a stream, serves
//! incoming requests through an [`RpcHandler`], and matches responses to
//! outstanding calls by id.
//!
//! Messages are newline-delimited JSON. In-memory duplex pipes are provided
//! for tests and single-process clusters.

mod protocol;
mod remote;

pub use protocol::{codes, RpcFault, RpcRequest, RpcResponse};
pub use remote::{pipe, NullHandler, Remote, RpcHandler};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("remote error {code}: {message}")]
    Fault { code: i32, message: String },
}

impl RpcError {
    /// The JSON-RPC error code carried by a remote fault, if any.
    pub fn fault_code(&self) -> Option<i32> {
        match self {
            RpcError::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<RpcFault> for RpcError {
    fn from(fault: RpcFault) -> Self {
        RpcError::Fault {
            code: fault.code,
            message: fault.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
