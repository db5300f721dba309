//! PeerLink store
//!
//! The authoritative registry behind a pool: node records, balances, peer
//! observations, request nonces, and account links. The [`Store`] trait keeps
//! the persistence backend open; [`MemoryStore`] is the in-memory
//! implementation used by tests and single-process pools.
//!
//! Every trait method is atomic from the caller's viewpoint. Compound
//! operations such as [`Store::update_node_peers`] are a single call, never
//! an external read-modify-write.

mod memory;
mod types;

pub use memory::MemoryStore;
pub use types::{Account, Balance, Node, Stats};

use std::time::Duration;

use peerlink_core::{NetworkId, NodeId, NodeKind};
use thiserror::Error;

/// How often agents are expected to check in.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// A node that has not been seen for this long is inactive.
pub const EXPIRE_INTERVAL: Duration = Duration::from_secs(300);

/// Default tolerance between a request nonce and the server clock.
pub const MAX_NONCE_SKEW: Duration = Duration::from_secs(3600);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid nonce")]
    InvalidNonce,

    #[error("unregistered node")]
    UnregisteredNode,

    #[error("malformed node: zero id")]
    MalformedNode,

    #[error("node is not authorized for this account")]
    NotAuthorized,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent pool state.
pub trait Store: Send + Sync {
    /// Validate and persist a request nonce for a node. Succeeds iff the
    /// nonce is strictly greater than the last one saved for this node and,
    /// when skew enforcement is on, close enough to the server clock.
    fn check_and_save_nonce(&self, node_id: &NodeId, nonce: i64) -> Result<()>;

    fn get_node(&self, id: &NodeId) -> Result<Node>;

    /// Insert or update a node record. Rejects the zero id.
    fn set_node(&self, node: Node) -> Result<()>;

    /// Credit (or debit, with a negative delta) a node's effective balance:
    /// the linked account's shared balance, else the node's trial balance.
    fn add_node_balance(&self, id: &NodeId, delta: i128) -> Result<()>;

    /// The node's effective balance. Trial balances may be negative.
    fn get_node_balance(&self, id: &NodeId) -> Result<Balance>;

    /// Registered peers this node has observed that are still active.
    fn node_peers(&self, id: &NodeId) -> Result<Vec<Node>>;

    /// Reconcile a node's reported peer set. Records observations for
    /// reported peers that are known and active, refreshes the node's
    /// `last_seen` and `block_number`, and drops observations that have been
    /// missing from reports for longer than [`EXPIRE_INTERVAL`], returning
    /// the dropped ids.
    fn update_node_peers(
        &self,
        id: &NodeId,
        peers: &[NodeId],
        block_number: u64,
    ) -> Result<Vec<NodeId>>;

    /// Up to `limit` active hosts, optionally filtered by kind, most
    /// recently seen first with NodeId as the deterministic tie-break.
    fn active_hosts(&self, kind: Option<NodeKind>, limit: usize) -> Result<Vec<Node>>;

    /// Highest block number reported by any active node of the network.
    fn latest_block_number(&self, network: NetworkId) -> Result<u64>;

    /// Link a node to an account. Re-linking the same pair is a no-op; a
    /// trial balance held by the node folds into the account's shared
    /// balance.
    fn add_account_node(&self, account: &Account, id: &NodeId) -> Result<()>;

    fn get_account_nodes(&self, account: &Account) -> Result<Vec<NodeId>>;

    /// Ok iff the node is linked to the account.
    fn is_account_node(&self, account: &Account, id: &NodeId) -> Result<()>;

    fn stats(&self) -> Result<Stats>;

    fn close(&self) -> Result<()>;
}
