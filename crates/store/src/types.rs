use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use peerlink_core::{NetworkId, NodeId, NodeKind};

use crate::EXPIRE_INTERVAL;

/// Opaque payout identifier, typically an on-chain address. Many nodes may
/// link to one account; they share a single balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(pub String);

impl Account {
    pub fn new(addr: impl Into<String>) -> Self {
        Account(addr.into())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered node. Never explicitly destroyed; it falls out of the
/// active set once `last_seen` ages past [`EXPIRE_INTERVAL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub uri: Option<String>,
    pub is_host: bool,
    pub last_seen: SystemTime,
    pub block_number: u64,
    pub kind: NodeKind,
    pub network: NetworkId,
    pub payout: Option<Account>,
}

impl Node {
    /// A blank record for `id`, last seen at the epoch (inactive).
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            uri: None,
            is_host: false,
            last_seen: UNIX_EPOCH,
            block_number: 0,
            kind: NodeKind::Unknown,
            network: NetworkId::Unknown,
            payout: None,
        }
    }

    pub fn is_active(&self, now: SystemTime) -> bool {
        self.is_active_within(now, EXPIRE_INTERVAL)
    }

    /// Activity check against a custom expiry window.
    pub fn is_active_within(&self, now: SystemTime, expire: std::time::Duration) -> bool {
        match now.duration_since(self.last_seen) {
            Ok(age) => age < expire,
            // last_seen in the future means a fresher record than our clock.
            Err(_) => true,
        }
    }
}

/// A credit balance. Nodes without an account carry a trial balance, which
/// may go negative; once an account is linked the balance is shared across
/// all of the account's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
    pub credit: i128,
    pub deposit: i128,
    pub trial: bool,
}

impl Balance {
    pub fn trial() -> Self {
        Balance {
            trial: true,
            ..Balance::default()
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account {
            Some(account) => write!(f, "{} credit (account {})", self.credit, account),
            None => write!(f, "{} credit (trial)", self.credit),
        }
    }
}

/// Aggregate snapshot for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_hosts: usize,
    pub active_hosts: usize,
    pub total_clients: usize,
    pub active_clients: usize,
    pub total_credit: i128,
    pub trial_balances: usize,
    pub latest_block_number: u64,
}
