//! PeerLink agent
//!
//! The companion process that keeps one blockchain node registered with a
//! pool: it reconciles the node's actual peer set against the pool's view,
//! tops up host connections when the node runs short, enforces the trust
//! list, and reports block progress on every tick.

mod agent;
mod rpc;

pub use agent::{Agent, AgentConfig, AgentEvent, AgentState};
pub use rpc::AgentConnection;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent is already started")]
    AlreadyStarted,

    #[error("start timed out")]
    StartTimeout,

    #[error("tick deadline exceeded")]
    TickDeadline,

    #[error("pool error: {0}")]
    Pool(#[from] peerlink_pool::PoolError),

    /// The pool Update call itself failed. The only tick error that
    /// terminates the update loop.
    #[error("pool update failed: {0}")]
    UpdateFailed(#[source] peerlink_pool::PoolError),

    #[error("node error: {0}")]
    Node(#[from] peerlink_ethnode::EthnodeError),

    /// Per-peer cleanup failures collected over one tick. Logged by the
    /// update loop, which then continues on the next interval.
    #[error("failed to drop invalid peers: {0:?}")]
    Aggregate(Vec<String>),
}

pub type Result<T> = std::result::Result<T, AgentError>;
