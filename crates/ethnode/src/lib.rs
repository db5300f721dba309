//! PeerLink node adapter
//!
//! The agent's view of the blockchain node it babysits: enode identity,
//! peer management, trust list, and block progress. [`GethNode`] speaks the
//! node's native `admin_*`/`eth_*` RPC namespace; [`FakeNode`] is a scripted
//! in-memory double for tests and single-process clusters.

mod fake;
mod geth;

pub use fake::FakeNode;
pub use geth::GethNode;

use async_trait::async_trait;
use thiserror::Error;

use peerlink_core::{NodeId, PeerInfo, UserAgent};

#[derive(Error, Debug)]
pub enum EthnodeError {
    #[error("remote error: {0}")]
    Remote(#[from] peerlink_rpc::RpcError),

    #[error("node is not compatible: {0}")]
    Unsupported(String),

    #[error("bad response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, EthnodeError>;

/// Operations the agent needs from the underlying node.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    /// The node's advertised enode URI.
    async fn enode(&self) -> Result<String>;

    /// What this node is: implementation family, network, full/light.
    fn user_agent(&self) -> UserAgent;

    /// Currently connected peers.
    async fn peers(&self) -> Result<Vec<PeerInfo>>;

    async fn connect_peer(&self, uri: &str) -> Result<()>;

    async fn disconnect_peer(&self, id: &NodeId) -> Result<()>;

    async fn add_trusted_peer(&self, id: &NodeId) -> Result<()>;

    async fn remove_trusted_peer(&self, id: &NodeId) -> Result<()>;

    async fn block_number(&self) -> Result<u64>;

    /// Probe that the admin surface this adapter needs is present. Fails
    /// with [`EthnodeError::Unsupported`] when the node answers
    /// method-not-found.
    async fn check_compatible(&self) -> Result<()>;
}
