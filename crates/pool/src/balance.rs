//! Balance accrual for active peering
//!
//! Hosts earn credit for every client they keep peered; clients pay the same
//! amount, on trial credit until they link an account. Accrual runs inside a
//! client's Update, using the gap since the client's previous check-in as
//! the billing interval, clamped so a long-disconnected client is not billed
//! for the whole outage.

use std::time::Duration;

use peerlink_core::NodeId;
use peerlink_store::Store;

use crate::Result;

pub struct Accountant {
    rate_per_second: i128,
    max_accrual_interval: Duration,
}

impl Accountant {
    pub fn new(rate_per_second: i128, max_accrual_interval: Duration) -> Self {
        Self {
            rate_per_second,
            max_accrual_interval,
        }
    }

    /// Settle one client update: credit each mutual host peer for `elapsed`
    /// of service, debit the client the total. Returns the amount charged.
    pub fn settle_client_update(
        &self,
        store: &dyn Store,
        client: &NodeId,
        hosts: &[NodeId],
        elapsed: Duration,
    ) -> Result<i128> {
        let billed = elapsed.min(self.max_accrual_interval);
        let per_host = self.rate_per_second * billed.as_secs() as i128;
        if per_host == 0 || hosts.is_empty() {
            return Ok(0);
        }

        for host in hosts {
            store.add_node_balance(host, per_host)?;
        }
        let total = per_host * hosts.len() as i128;
        store.add_node_balance(client, -total)?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_core::NodeId;
    use peerlink_store::{MemoryStore, Node};

    fn id_with(first: u8) -> NodeId {
        let mut bytes = [0u8; 64];
        bytes[0] = first;
        NodeId::from_bytes(bytes)
    }

    fn setup() -> (MemoryStore, NodeId, NodeId, NodeId) {
        let store = MemoryStore::new();
        let client = id_with(1);
        let host_a = id_with(2);
        let host_b = id_with(3);
        for id in [client, host_a, host_b] {
            store.set_node(Node::new(id)).unwrap();
        }
        (store, client, host_a, host_b)
    }

    #[test]
    fn test_settle_credits_hosts_and_debits_client() {
        let (store, client, host_a, host_b) = setup();
        let accountant = Accountant::new(2, Duration::from_secs(600));

        let charged = accountant
            .settle_client_update(&store, &client, &[host_a, host_b], Duration::from_secs(60))
            .unwrap();

        assert_eq!(charged, 2 * 60 * 2);
        assert_eq!(store.get_node_balance(&host_a).unwrap().credit, 120);
        assert_eq!(store.get_node_balance(&host_b).unwrap().credit, 120);
        assert_eq!(store.get_node_balance(&client).unwrap().credit, -240);
    }

    #[test]
    fn test_settle_clamps_long_gaps() {
        let (store, client, host_a, _) = setup();
        let accountant = Accountant::new(1, Duration::from_secs(600));

        // A client gone for an hour is billed for the clamp, not the hour.
        let charged = accountant
            .settle_client_update(&store, &client, &[host_a], Duration::from_secs(3600))
            .unwrap();
        assert_eq!(charged, 600);
    }

    #[test]
    fn test_settle_nothing_without_hosts_or_time() {
        let (store, client, host_a, _) = setup();
        let accountant = Accountant::new(1, Duration::from_secs(600));

        assert_eq!(
            accountant
                .settle_client_update(&store, &client, &[], Duration::from_secs(60))
                .unwrap(),
            0
        );
        assert_eq!(
            accountant
                .settle_client_update(&store, &client, &[host_a], Duration::ZERO)
                .unwrap(),
            0
        );
        assert_eq!(store.get_node_balance(&client).unwrap().credit, 0);
    }
}
