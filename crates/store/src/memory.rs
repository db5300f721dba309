//! In-memory store
//!
//! A single-mutex implementation of [`Store`]. Good for tests and
//! single-process pools; nothing survives a restart.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use peerlink_core::{NetworkId, NodeId, NodeKind};

use crate::types::{Account, Balance, Node, Stats};
use crate::{Result, Store, StoreError, EXPIRE_INTERVAL, MAX_NONCE_SKEW};

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    /// Balances for nodes without a linked account.
    trial_balances: HashMap<NodeId, Balance>,
    /// Shared balances, one per account.
    account_balances: HashMap<Account, Balance>,
    node_accounts: HashMap<NodeId, Account>,
    account_nodes: HashMap<Account, BTreeSet<NodeId>>,
    nonces: HashMap<NodeId, i64>,
    /// observations[a][b] = when `a` last reported `b` as a peer.
    observations: HashMap<NodeId, HashMap<NodeId, SystemTime>>,
}

pub struct MemoryStore {
    max_nonce_skew: Option<Duration>,
    expire_interval: Duration,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            max_nonce_skew: Some(MAX_NONCE_SKEW),
            expire_interval: EXPIRE_INTERVAL,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Override (or disable, with `None`) the nonce clock-skew window.
    pub fn with_max_nonce_skew(mut self, max_nonce_skew: Option<Duration>) -> Self {
        self.max_nonce_skew = max_nonce_skew;
        self
    }

    /// Override the liveness window. Both node activity and peer
    /// observations expire against this interval.
    pub fn with_expire_interval(mut self, expire_interval: Duration) -> Self {
        self.expire_interval = expire_interval;
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(_) => 0,
    }
}

impl Inner {
    fn require_node(&self, id: &NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(StoreError::UnregisteredNode)
    }

    /// The balance a node spends from: its account's shared balance when
    /// linked, otherwise its trial balance.
    fn effective_balance_mut(&mut self, id: &NodeId) -> &mut Balance {
        if let Some(account) = self.node_accounts.get(id).cloned() {
            self.account_balances
                .entry(account.clone())
                .or_insert_with(|| Balance {
                    account: Some(account),
                    ..Balance::default()
                })
        } else {
            self.trial_balances
                .entry(*id)
                .or_insert_with(Balance::trial)
        }
    }
}

impl Store for MemoryStore {
    fn check_and_save_nonce(&self, node_id: &NodeId, nonce: i64) -> Result<()> {
        if let Some(skew) = self.max_nonce_skew {
            let now = unix_nanos(SystemTime::now());
            let window = skew.as_nanos() as i64;
            if (nonce - now).saturating_abs() >= window {
                return Err(StoreError::InvalidNonce);
            }
        }

        let mut inner = self.inner.lock();
        if let Some(last) = inner.nonces.get(node_id) {
            if *last >= nonce {
                return Err(StoreError::InvalidNonce);
            }
        }
        inner.nonces.insert(*node_id, nonce);
        Ok(())
    }

    fn get_node(&self, id: &NodeId) -> Result<Node> {
        self.inner.lock().require_node(id).cloned()
    }

    fn set_node(&self, node: Node) -> Result<()> {
        if node.id.is_zero() {
            return Err(StoreError::MalformedNode);
        }
        self.inner.lock().nodes.insert(node.id, node);
        Ok(())
    }

    fn add_node_balance(&self, id: &NodeId, delta: i128) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.require_node(id)?;
        inner.effective_balance_mut(id).credit += delta;
        Ok(())
    }

    fn get_node_balance(&self, id: &NodeId) -> Result<Balance> {
        let mut inner = self.inner.lock();
        inner.require_node(id)?;
        Ok(inner.effective_balance_mut(id).clone())
    }

    fn node_peers(&self, id: &NodeId) -> Result<Vec<Node>> {
        let inner = self.inner.lock();
        inner.require_node(id)?;
        let now = SystemTime::now();

        let mut peers: Vec<Node> = inner
            .observations
            .get(id)
            .map(|observed| {
                observed
                    .keys()
                    .filter_map(|peer_id| inner.nodes.get(peer_id))
                    .filter(|peer| peer.is_active_within(now, self.expire_interval))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(peers)
    }

    fn update_node_peers(
        &self,
        id: &NodeId,
        peers: &[NodeId],
        block_number: u64,
    ) -> Result<Vec<NodeId>> {
        let mut inner = self.inner.lock();
        let now = SystemTime::now();

        {
            let node = inner.nodes.get_mut(id).ok_or(StoreError::UnregisteredNode)?;
            node.last_seen = now;
            node.block_number = block_number;
        }

        let reported: BTreeSet<NodeId> = peers.iter().copied().collect();
        let known: Vec<NodeId> = reported
            .iter()
            .copied()
            .filter(|peer_id| {
                inner
                    .nodes
                    .get(peer_id)
                    .map(|peer| peer.is_active_within(now, self.expire_interval))
                    .unwrap_or(false)
            })
            .collect();

        let observed = inner.observations.entry(*id).or_default();
        for peer_id in known {
            observed.insert(peer_id, now);
        }

        // Observations missing from the report only qualify as inactive once
        // they age past the expiry window; a peer momentarily absent from one
        // report is left alone.
        let mut inactive: Vec<NodeId> = Vec::new();
        observed.retain(|peer_id, seen| {
            if reported.contains(peer_id) {
                return true;
            }
            let expired = now
                .duration_since(*seen)
                .map(|age| age > self.expire_interval)
                .unwrap_or(false);
            if expired {
                inactive.push(*peer_id);
            }
            !expired
        });
        inactive.sort();
        Ok(inactive)
    }

    fn active_hosts(&self, kind: Option<NodeKind>, limit: usize) -> Result<Vec<Node>> {
        let inner = self.inner.lock();
        let now = SystemTime::now();

        let mut hosts: Vec<Node> = inner
            .nodes
            .values()
            .filter(|node| node.is_host && node.is_active_within(now, self.expire_interval))
            .filter(|node| kind.map(|k| node.kind == k).unwrap_or(true))
            .cloned()
            .collect();
        hosts.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.id.cmp(&b.id)));
        hosts.truncate(limit);
        Ok(hosts)
    }

    fn latest_block_number(&self, network: NetworkId) -> Result<u64> {
        let inner = self.inner.lock();
        let now = SystemTime::now();
        Ok(inner
            .nodes
            .values()
            .filter(|node| node.network == network)
            .filter(|node| node.is_active_within(now, self.expire_interval))
            .map(|node| node.block_number)
            .max()
            .unwrap_or(0))
    }

    fn add_account_node(&self, account: &Account, id: &NodeId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.require_node(id)?;

        match inner.node_accounts.get(id).cloned() {
            Some(current) if current == *account => return Ok(()),
            Some(current) => {
                // Re-linking moves the node; credits stay with the old pool.
                if let Some(nodes) = inner.account_nodes.get_mut(&current) {
                    nodes.remove(id);
                }
            }
            None => {}
        }

        inner.node_accounts.insert(*id, account.clone());
        inner.account_nodes.entry(account.clone()).or_default().insert(*id);

        let folded = inner.trial_balances.remove(id);
        let shared = inner.effective_balance_mut(id);
        if let Some(trial) = folded {
            shared.credit += trial.credit;
            shared.deposit += trial.deposit;
        }
        Ok(())
    }

    fn get_account_nodes(&self, account: &Account) -> Result<Vec<NodeId>> {
        let inner = self.inner.lock();
        Ok(inner
            .account_nodes
            .get(account)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default())
    }

    fn is_account_node(&self, account: &Account, id: &NodeId) -> Result<()> {
        let inner = self.inner.lock();
        let linked = inner
            .account_nodes
            .get(account)
            .map(|nodes| nodes.contains(id))
            .unwrap_or(false);
        if linked {
            Ok(())
        } else {
            Err(StoreError::NotAuthorized)
        }
    }

    fn stats(&self) -> Result<Stats> {
        let inner = self.inner.lock();
        let now = SystemTime::now();

        let mut stats = Stats::default();
        for node in inner.nodes.values() {
            let active = node.is_active_within(now, self.expire_interval);
            if node.is_host {
                stats.total_hosts += 1;
                if active {
                    stats.active_hosts += 1;
                }
            } else {
                stats.total_clients += 1;
                if active {
                    stats.active_clients += 1;
                }
            }
            if active && node.block_number > stats.latest_block_number {
                stats.latest_block_number = node.block_number;
            }
        }
        for balance in inner.trial_balances.values() {
            stats.total_credit += balance.credit;
        }
        for balance in inner.account_balances.values() {
            stats.total_credit += balance.credit;
        }
        stats.trial_balances = inner.trial_balances.len();
        Ok(stats)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with(first: u8) -> NodeId {
        let mut bytes = [0u8; 64];
        bytes[0] = first;
        NodeId::from_bytes(bytes)
    }

    fn active_node(first: u8) -> Node {
        let mut node = Node::new(id_with(first));
        node.last_seen = SystemTime::now();
        node
    }

    fn wall_nonce() -> i64 {
        unix_nanos(SystemTime::now())
    }

    #[test]
    fn test_nonce_monotonic_per_node() {
        let store = MemoryStore::new();
        let a = id_with(1);
        let b = id_with(2);
        let nonce = wall_nonce();

        store.check_and_save_nonce(&a, nonce).unwrap();
        store.check_and_save_nonce(&a, nonce + 1).unwrap();
        assert_eq!(
            store.check_and_save_nonce(&a, nonce - 1),
            Err(StoreError::InvalidNonce)
        );
        assert_eq!(
            store.check_and_save_nonce(&a, nonce + 1),
            Err(StoreError::InvalidNonce)
        );
        // Nonces are tracked per node.
        store.check_and_save_nonce(&b, nonce + 100).unwrap();
    }

    #[test]
    fn test_nonce_outside_skew_window() {
        let store = MemoryStore::new();
        let id = id_with(1);

        let stale = wall_nonce() - Duration::from_secs(2 * 3600).as_nanos() as i64;
        assert_eq!(
            store.check_and_save_nonce(&id, stale),
            Err(StoreError::InvalidNonce)
        );

        let future = wall_nonce() + Duration::from_secs(2 * 3600).as_nanos() as i64;
        assert_eq!(
            store.check_and_save_nonce(&id, future),
            Err(StoreError::InvalidNonce)
        );

        store.check_and_save_nonce(&id, wall_nonce()).unwrap();
    }

    #[test]
    fn test_nonce_replay_sequence_without_skew() {
        // Raw integer nonces, skew enforcement off: the strictly-increasing
        // property stands alone.
        let store = MemoryStore::new().with_max_nonce_skew(None);
        let a = id_with(0xa);
        let b = id_with(0xb);

        store.check_and_save_nonce(&a, 1000).unwrap();
        assert_eq!(
            store.check_and_save_nonce(&a, 1000),
            Err(StoreError::InvalidNonce)
        );
        store.check_and_save_nonce(&a, 1001).unwrap();
        assert_eq!(
            store.check_and_save_nonce(&a, 999),
            Err(StoreError::InvalidNonce)
        );
        store.check_and_save_nonce(&b, 999).unwrap();
    }

    #[test]
    fn test_node_get_set() {
        let store = MemoryStore::new();
        let node = Node::new(id_with(1));

        assert_eq!(store.get_node(&node.id), Err(StoreError::UnregisteredNode));
        assert_eq!(
            store.set_node(Node::new(NodeId::ZERO)),
            Err(StoreError::MalformedNode)
        );

        store.set_node(node.clone()).unwrap();
        assert_eq!(store.get_node(&node.id).unwrap().id, node.id);
    }

    #[test]
    fn test_balance_add_and_negative() {
        let store = MemoryStore::new();
        let node = Node::new(id_with(1));

        assert_eq!(
            store.add_node_balance(&node.id, 42),
            Err(StoreError::UnregisteredNode)
        );
        assert_eq!(
            store.get_node_balance(&node.id),
            Err(StoreError::UnregisteredNode)
        );

        store.set_node(node.clone()).unwrap();
        store.add_node_balance(&node.id, 42).unwrap();
        store.add_node_balance(&node.id, 3).unwrap();
        assert_eq!(store.get_node_balance(&node.id).unwrap().credit, 45);

        // Trial balances may go negative.
        store.add_node_balance(&node.id, -50).unwrap();
        let balance = store.get_node_balance(&node.id).unwrap();
        assert_eq!(balance.credit, -5);
        assert!(balance.trial);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_clients, 1);
        assert_eq!(stats.total_credit, -5);
        assert_eq!(stats.trial_balances, 1);
    }

    #[test]
    fn test_update_node_peers_ignores_unknown() {
        let store = MemoryStore::new();
        let node = active_node(1);
        store.set_node(node.clone()).unwrap();

        // Reported peer is not registered: no observation recorded.
        let inactive = store
            .update_node_peers(&node.id, &[id_with(2)], 42)
            .unwrap();
        assert!(inactive.is_empty());
        assert!(store.node_peers(&node.id).unwrap().is_empty());

        // Block number is set atomically with the update.
        assert_eq!(store.get_node(&node.id).unwrap().block_number, 42);
    }

    #[test]
    fn test_update_node_peers_records_known_active() {
        let store = MemoryStore::new();
        let node = active_node(1);
        let peer_a = active_node(2);
        let peer_b = active_node(3);
        store.set_node(node.clone()).unwrap();
        store.set_node(peer_a.clone()).unwrap();
        store.set_node(peer_b.clone()).unwrap();

        let inactive = store
            .update_node_peers(&node.id, &[peer_a.id, peer_b.id], 7)
            .unwrap();
        assert!(inactive.is_empty());

        let peers = store.node_peers(&node.id).unwrap();
        let ids: Vec<NodeId> = peers.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![peer_a.id, peer_b.id]);
    }

    #[test]
    fn test_update_node_peers_skips_expired_peer_records() {
        let store = MemoryStore::new();
        let node = active_node(1);
        let stale = Node::new(id_with(2)); // last_seen at epoch
        store.set_node(node.clone()).unwrap();
        store.set_node(stale.clone()).unwrap();

        store.update_node_peers(&node.id, &[stale.id], 1).unwrap();
        assert!(store.node_peers(&node.id).unwrap().is_empty());
    }

    #[test]
    fn test_unregistered_node_peer_calls() {
        let store = MemoryStore::new();
        let id = id_with(1);
        assert_eq!(store.node_peers(&id), Err(StoreError::UnregisteredNode));
        assert_eq!(
            store.update_node_peers(&id, &[], 0),
            Err(StoreError::UnregisteredNode)
        );
    }

    #[test]
    fn test_dropped_observation_expires_into_inactive() {
        let store = MemoryStore::new();
        let node = active_node(1);
        let peer = active_node(2);
        store.set_node(node.clone()).unwrap();
        store.set_node(peer.clone()).unwrap();

        store.update_node_peers(&node.id, &[peer.id], 1).unwrap();

        // Missing from the next report, but not yet expired: kept.
        let inactive = store.update_node_peers(&node.id, &[], 2).unwrap();
        assert!(inactive.is_empty());

        // Backdate the observation past the expiry window.
        {
            let mut inner = store.inner.lock();
            let seen = inner
                .observations
                .get_mut(&node.id)
                .and_then(|m| m.get_mut(&peer.id))
                .unwrap();
            *seen = SystemTime::now() - EXPIRE_INTERVAL - Duration::from_secs(1);
        }

        let inactive = store.update_node_peers(&node.id, &[], 3).unwrap();
        assert_eq!(inactive, vec![peer.id]);
        // Invariant: the dropped edge is gone from node_peers.
        assert!(store.node_peers(&node.id).unwrap().is_empty());
    }

    #[test]
    fn test_active_hosts_filters_and_orders() {
        let store = MemoryStore::new();
        assert!(store.active_hosts(None, 3).unwrap().is_empty());

        let now = SystemTime::now();
        for i in 0u8..10 {
            let mut node = Node::new(id_with(i + 1));
            node.is_host = i % 2 == 0;
            node.block_number = 100 + i as u64;
            node.kind = NodeKind::Geth;
            if i > 5 {
                node.last_seen = now;
            }
            store.set_node(node).unwrap();
        }

        // Hosts are the even indices; only 6 and 8 are active. Same
        // last_seen, so NodeId breaks the tie.
        let hosts = store.active_hosts(None, 10).unwrap();
        let ids: Vec<NodeId> = hosts.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![id_with(7), id_with(9)]);

        let hosts = store.active_hosts(None, 1).unwrap();
        assert_eq!(hosts.len(), 1);
        assert!(hosts[0].block_number >= 100);

        // Kind filter excludes everything else.
        assert!(store
            .active_hosts(Some(NodeKind::Parity), 10)
            .unwrap()
            .is_empty());

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_hosts, 5);
        assert_eq!(stats.active_hosts, 2);
        assert_eq!(stats.total_clients, 5);
        assert_eq!(stats.active_clients, 2);
        assert_eq!(stats.latest_block_number, 109);
    }

    #[test]
    fn test_active_hosts_never_returns_expired_or_clients() {
        let store = MemoryStore::new();
        let mut host = active_node(1);
        host.is_host = true;
        let mut expired_host = Node::new(id_with(2));
        expired_host.is_host = true;
        let client = active_node(3);
        store.set_node(host.clone()).unwrap();
        store.set_node(expired_host).unwrap();
        store.set_node(client).unwrap();

        let hosts = store.active_hosts(None, 10).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, host.id);
    }

    #[test]
    fn test_account_link_and_authorization() {
        let store = MemoryStore::new();
        let node = Node::new(id_with(1));
        store.set_node(node.clone()).unwrap();

        let account = Account::new("abcd");
        assert_eq!(
            store.is_account_node(&account, &node.id),
            Err(StoreError::NotAuthorized)
        );

        store.add_account_node(&account, &node.id).unwrap();
        store.is_account_node(&account, &node.id).unwrap();
        assert_eq!(
            store.get_node_balance(&node.id).unwrap().account,
            Some(account.clone())
        );

        // Re-adding the same pair is a no-op.
        store.add_account_node(&account, &node.id).unwrap();

        // Another account/node pair does not leak in.
        let other = Node::new(id_with(2));
        store.set_node(other.clone()).unwrap();
        store.add_account_node(&Account::new("efgh"), &other.id).unwrap();

        assert_eq!(store.get_account_nodes(&account).unwrap(), vec![node.id]);
    }

    #[test]
    fn test_account_link_folds_trial_balance() {
        let store = MemoryStore::new();
        let node = Node::new(id_with(1));
        store.set_node(node.clone()).unwrap();
        store.add_node_balance(&node.id, 42).unwrap();

        let node2 = Node::new(id_with(2));
        store.set_node(node2.clone()).unwrap();

        let account = Account::new("abcd");
        store.add_account_node(&account, &node2.id).unwrap();
        store.add_node_balance(&node2.id, 69).unwrap();
        assert_eq!(store.get_node_balance(&node2.id).unwrap().credit, 69);

        // Linking node folds its trial 42 into the shared balance; both
        // nodes now see the same account balance.
        store.add_account_node(&account, &node.id).unwrap();
        for id in [&node.id, &node2.id] {
            let balance = store.get_node_balance(id).unwrap();
            assert_eq!(balance.credit, 42 + 69);
            assert_eq!(balance.account, Some(account.clone()));
            assert!(!balance.trial);
        }
        assert_eq!(store.stats().unwrap().trial_balances, 0);
    }

    #[test]
    fn test_accrual_after_link_is_shared() {
        let store = MemoryStore::new();
        let node = Node::new(id_with(1));
        let node2 = Node::new(id_with(2));
        store.set_node(node.clone()).unwrap();
        store.set_node(node2.clone()).unwrap();

        let account = Account::new("shared");
        store.add_account_node(&account, &node.id).unwrap();
        store.add_account_node(&account, &node2.id).unwrap();

        store.add_node_balance(&node.id, 10).unwrap();
        store.add_node_balance(&node2.id, 5).unwrap();
        assert_eq!(store.get_node_balance(&node.id).unwrap().credit, 15);
        assert_eq!(store.get_node_balance(&node2.id).unwrap().credit, 15);
    }

    #[test]
    fn test_latest_block_number_per_network() {
        let store = MemoryStore::new();

        let mut mainnet = active_node(1);
        mainnet.network = NetworkId::Mainnet;
        mainnet.block_number = 500;
        let mut ropsten = active_node(2);
        ropsten.network = NetworkId::Ropsten;
        ropsten.block_number = 900;
        let mut stale = Node::new(id_with(3));
        stale.network = NetworkId::Mainnet;
        stale.block_number = 10_000;
        store.set_node(mainnet).unwrap();
        store.set_node(ropsten).unwrap();
        store.set_node(stale).unwrap();

        // Expired nodes do not contribute, and networks do not mix.
        assert_eq!(store.latest_block_number(NetworkId::Mainnet).unwrap(), 500);
        assert_eq!(store.latest_block_number(NetworkId::Ropsten).unwrap(), 900);
        assert_eq!(store.latest_block_number(NetworkId::Kovan).unwrap(), 0);
    }

    #[test]
    fn test_configurable_expire_interval() {
        let store = MemoryStore::new().with_expire_interval(Duration::from_millis(10));
        let mut host = Node::new(id_with(1));
        host.is_host = true;
        host.last_seen = SystemTime::now() - Duration::from_millis(50);
        store.set_node(host).unwrap();
        assert!(store.active_hosts(None, 5).unwrap().is_empty());
    }

    #[test]
    fn test_stats_empty_store() {
        let store = MemoryStore::new();
        assert_eq!(store.stats().unwrap(), Stats::default());
        store.close().unwrap();
    }
}
