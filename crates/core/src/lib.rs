//! PeerLink core types
//!
//! Shared identifiers and wire-level primitives used by every other crate:
//! node identities, network/kind tags, user agents, and the enode URI
//! grammar used when reconciling peer lists.

mod enode;
mod types;

pub use enode::{parse_enode, EnodeUri};
pub use types::{NetworkId, NodeId, NodeKind, PeerInfo, UserAgent};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid enode URI: {0}")]
    InvalidEnode(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
