//! Pool service implementation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use peerlink_core::{parse_enode, NodeId};
use peerlink_rpc::Remote;
use peerlink_store::{Account, Balance, Node, Stats, Store, StoreError, EXPIRE_INTERVAL};

use crate::api::{
    ConnectRequest, ConnectResponse, HostCandidate, PeerRequest, PeerResponse, UpdateRequest,
    UpdateResponse,
};
use crate::balance::Accountant;
use crate::rpc::methods;
use crate::{PoolError, Result};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Reported to agents in the Connect response.
    pub version: String,
    /// Welcome message for connecting operators. Optional.
    pub welcome_message: Option<String>,
    /// Credit accrued per host per second of active peering.
    pub rate_per_second: i128,
    /// Cap on the billing gap for a single update, so a client returning
    /// from a long disconnect is not charged for the whole outage.
    pub max_accrual_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            welcome_message: None,
            rate_per_second: 1,
            max_accrual_interval: 2 * EXPIRE_INTERVAL,
        }
    }
}

/// The pool: registry, matchmaking, and balance bookkeeping over a [`Store`].
///
/// Methods take the verified caller id; envelope verification happens in the
/// RPC layer before dispatch.
pub struct PoolService {
    store: Arc<dyn Store>,
    config: PoolConfig,
    accountant: Accountant,
    /// Live agent connections, used to whitelist matched clients on hosts.
    agents: Mutex<HashMap<NodeId, Remote>>,
}

impl PoolService {
    pub fn new(store: Arc<dyn Store>, config: PoolConfig) -> Self {
        let accountant = Accountant::new(config.rate_per_second, config.max_accrual_interval);
        Self {
            store,
            config,
            accountant,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Register a live agent connection for whitelist callbacks.
    pub fn attach_agent(&self, id: NodeId, remote: Remote) {
        self.agents.lock().insert(id, remote);
    }

    pub fn detach_agent(&self, id: &NodeId) {
        self.agents.lock().remove(id);
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(self.store.stats()?)
    }

    /// Register or refresh the caller's node record.
    pub async fn connect(&self, caller: NodeId, req: ConnectRequest) -> Result<ConnectResponse> {
        if let Some(uri) = &req.node_uri {
            let parsed = parse_enode(uri)
                .map_err(|e| PoolError::BadRequest(format!("node_uri: {e}")))?;
            if parsed.id != caller {
                return Err(PoolError::SecurityViolation(
                    "node_uri public key does not match caller".to_string(),
                ));
            }
        }

        let mut node = match self.store.get_node(&caller) {
            Ok(node) => node,
            Err(StoreError::UnregisteredNode) => Node::new(caller),
            Err(e) => return Err(e.into()),
        };
        node.uri = req.node_uri.clone().or(node.uri);
        node.kind = req.node_info.kind;
        node.network = req.node_info.network;
        node.is_host = req.node_info.is_full_node;
        node.last_seen = SystemTime::now();

        let payout = req.payout.as_deref().filter(|p| !p.is_empty());
        if let Some(payout) = payout {
            node.payout = Some(Account::new(payout));
        }
        self.store.set_node(node)?;

        if let Some(payout) = payout {
            let account = Account::new(payout);
            match self.store.get_node_balance(&caller)?.account {
                Some(existing) if existing != account => {
                    return Err(PoolError::SecurityViolation(format!(
                        "node is already linked to account {existing}"
                    )));
                }
                Some(_) => {}
                None => self.store.add_account_node(&account, &caller)?,
            }
        }

        info!(node = %caller, version = %req.version, kind = %req.node_info.kind,
              host = req.node_info.is_full_node, "node connected");
        Ok(ConnectResponse {
            pool_version: self.config.version.clone(),
            message: self.config.welcome_message.clone(),
        })
    }

    /// Reconcile the caller's reported peers, accrue balances, and report
    /// back which peers are active and which must be dropped.
    pub async fn update(&self, caller: NodeId, req: UpdateRequest) -> Result<UpdateResponse> {
        let now = SystemTime::now();
        let node = self.store.get_node(&caller)?;
        let prev_seen = node.last_seen;

        let reported: Vec<NodeId> = req.peers.iter().map(|p| p.id).collect();
        let dropped = self
            .store
            .update_node_peers(&caller, &reported, req.block_number)?;
        let observed = self.store.node_peers(&caller)?;

        // A mutual edge exists once the peer has reported us back.
        let mut active_peers = Vec::new();
        let mut host_peers = Vec::new();
        for peer in &observed {
            let mutual = self
                .store
                .node_peers(&peer.id)
                .map(|list| list.iter().any(|n| n.id == caller))
                .unwrap_or(false);
            if mutual {
                active_peers.push(peer.id);
                if peer.is_host {
                    host_peers.push(peer.id);
                }
            }
        }

        if !node.is_host {
            let elapsed = now.duration_since(prev_seen).unwrap_or_default();
            let charged = self.accountant.settle_client_update(
                self.store.as_ref(),
                &caller,
                &host_peers,
                elapsed,
            )?;
            if charged > 0 {
                debug!(node = %caller, charged, hosts = host_peers.len(), "accrued peering credit");
            }
        }

        let observed_ids: HashSet<NodeId> = observed.iter().map(|n| n.id).collect();
        let mut invalid_peers: Vec<NodeId> = reported
            .iter()
            .copied()
            .filter(|id| !observed_ids.contains(id))
            .chain(dropped)
            .collect();
        invalid_peers.sort();
        invalid_peers.dedup();
        active_peers.sort();

        let balance = self.store.get_node_balance(&caller).ok();
        let latest_block_number = self.store.latest_block_number(node.network)?;

        debug!(node = %caller, active = active_peers.len(), invalid = invalid_peers.len(),
               block = req.block_number, "update");
        Ok(UpdateResponse {
            active_peers,
            invalid_peers,
            balance,
            latest_block_number,
        })
    }

    /// Pick up to `req.num` host candidates for the caller to connect to.
    /// Fewer than requested is not an error.
    pub async fn peer(&self, caller: NodeId, req: PeerRequest) -> Result<PeerResponse> {
        let node = self.store.get_node(&caller)?;
        let current: HashSet<NodeId> = self
            .store
            .node_peers(&caller)?
            .iter()
            .map(|n| n.id)
            .collect();

        // Over-fetch so post-filtering still fills the request.
        let limit = req.num + current.len() + 1;
        let hosts = self.store.active_hosts(req.kind, limit)?;

        let mut peers = Vec::new();
        for host in hosts {
            if host.id == caller || current.contains(&host.id) || host.network != node.network {
                continue;
            }
            let Some(uri) = host.uri else {
                continue;
            };
            peers.push(HostCandidate { id: host.id, uri });
            if peers.len() == req.num {
                break;
            }
        }

        // Tell each matched host's agent to trust the caller. Best effort: a
        // host without a live agent channel is still a valid candidate.
        for candidate in &peers {
            let remote = self.agents.lock().get(&candidate.id).cloned();
            if let Some(remote) = remote {
                if let Err(e) = remote
                    .call(methods::WHITELIST, Some(serde_json::json!([caller])))
                    .await
                {
                    warn!(host = %candidate.id, "whitelist call failed: {}", e);
                }
            }
        }

        info!(node = %caller, requested = req.num, matched = peers.len(), "peer request");
        Ok(PeerResponse { peers })
    }

    /// Drop the caller out of the active set immediately.
    pub async fn disconnect(&self, caller: NodeId) -> Result<()> {
        let mut node = self.store.get_node(&caller)?;
        node.last_seen = UNIX_EPOCH;
        self.store.set_node(node)?;
        self.detach_agent(&caller);
        info!(node = %caller, "node disconnected");
        Ok(())
    }

    /// Settlement hook. Balances settle out of band; this only reports the
    /// current snapshot.
    pub async fn withdraw(&self, caller: NodeId) -> Result<Balance> {
        self.store.get_node(&caller)?;
        let balance = self.store.get_node_balance(&caller)?;
        info!(node = %caller, balance = %balance, "withdraw requested");
        Ok(balance)
    }
}
