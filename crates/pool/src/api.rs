//! Pool request/response types and the client-facing trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use peerlink_core::{NodeId, NodeKind, PeerInfo, UserAgent};
use peerlink_store::Balance;

use crate::Result;

/// The pool as seen by an agent. Implemented in-process by wrappers around
/// [`crate::PoolService`] and over the wire by [`crate::RemotePool`]; the
/// caller's identity travels out of band (the signed envelope).
#[async_trait]
pub trait Pool: Send + Sync {
    /// Register or refresh this node with the pool.
    async fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse>;

    /// Report the node's current peer set and block progress.
    async fn update(&self, req: UpdateRequest) -> Result<UpdateResponse>;

    /// Ask for host candidates to peer with.
    async fn peer(&self, req: PeerRequest) -> Result<PeerResponse>;

    /// Mark this node inactive immediately.
    async fn disconnect(&self) -> Result<()>;

    /// Reserved settlement hook; returns the current balance snapshot.
    async fn withdraw(&self) -> Result<Balance>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Account to route pool credits towards. Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout: Option<String>,
    /// Override for the enode URI the pool advertises to other peers.
    /// Normally deduced, but useful behind NAT or non-standard ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_uri: Option<String>,
    /// Agent software version, for operator visibility.
    pub version: String,
    pub node_info: UserAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub pool_version: String,
    /// Welcome message for the operator to display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub peers: Vec<PeerInfo>,
    pub block_number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Peers mutually observed and still active.
    pub active_peers: Vec<NodeId>,
    /// Reported peers that are not (or no longer) legitimate; the agent
    /// must untrust and disconnect these.
    pub invalid_peers: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Balance>,
    /// Highest block seen across active nodes of the caller's network.
    pub latest_block_number: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerRequest {
    pub num: usize,
    /// Restrict candidates to one implementation family; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCandidate {
    pub id: NodeId,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerResponse {
    pub peers: Vec<HostCandidate>,
}
