//! Agent control loop

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use peerlink_core::NodeId;
use peerlink_ethnode::NodeAdapter;
use peerlink_pool::{ConnectRequest, PeerRequest, Pool, UpdateRequest};
use peerlink_store::{Balance, KEEPALIVE_INTERVAL};

use crate::{AgentError, Result};

const START_TIMEOUT: Duration = Duration::from_secs(10);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_NUM_HOSTS: usize = 3;

/// Agent lifecycle. Terminal state is `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Connecting,
    Running,
    Stopping,
    Stopped,
}

/// Things an operator-facing frontend may want to hear about.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Welcome or policy message from the pool, for display.
    PoolMessage(String),
    /// Balance snapshot from the latest update.
    Balance(Balance),
    /// Our block number vs the highest the pool has seen.
    BlockNumber { node: u64, pool: u64 },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Override for the enode URI advertised to the pool. When unset, the
    /// node's own enode is sent; useful behind NAT or odd port mappings.
    pub node_uri: Option<String>,
    /// Agent version reported on connect.
    pub version: Option<String>,
    /// Minimum number of hosts to stay peered with.
    pub num_hosts: usize,
    /// Account to accrue credits towards. Optional.
    pub payout: Option<String>,
    /// Time between pool updates.
    pub update_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_uri: None,
            version: None,
            num_hosts: DEFAULT_NUM_HOSTS,
            payout: None,
            update_interval: KEEPALIVE_INTERVAL,
        }
    }
}

struct AgentInner {
    node: Arc<dyn NodeAdapter>,
    config: AgentConfig,
    events: broadcast::Sender<AgentEvent>,
}

/// One node's pool liaison.
pub struct Agent {
    inner: Arc<AgentInner>,
    state: Arc<Mutex<AgentState>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    done_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl Agent {
    pub fn new(node: Arc<dyn NodeAdapter>, config: AgentConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(AgentInner {
                node,
                config,
                events,
            }),
            state: Arc::new(Mutex::new(AgentState::Idle)),
            stop_tx: Mutex::new(None),
            done_rx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    /// Register with the pool and start the update loop. Returns once the
    /// agent is registered and has run its first reconciliation; any failure
    /// along the way rolls the agent back to `Idle`.
    pub async fn start(&self, pool: Arc<dyn Pool>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                AgentState::Idle | AgentState::Stopped => *state = AgentState::Connecting,
                _ => return Err(AgentError::AlreadyStarted),
            }
        }

        let started = timeout(START_TIMEOUT, self.start_inner(pool.as_ref())).await;
        match started {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *self.state.lock() = AgentState::Idle;
                return Err(e);
            }
            Err(_) => {
                *self.state.lock() = AgentState::Idle;
                return Err(AgentError::StartTimeout);
            }
        }
        *self.state.lock() = AgentState::Running;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        *self.stop_tx.lock() = Some(stop_tx);
        *self.done_rx.lock() = Some(done_rx);

        let inner = self.inner.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let result = serve_updates(inner, pool, stop_rx).await;
            *state.lock() = AgentState::Stopped;
            let _ = done_tx.send(result);
        });
        Ok(())
    }

    async fn start_inner(&self, pool: &dyn Pool) -> Result<()> {
        let inner = &self.inner;
        let enode = inner.node.enode().await?;
        info!(%enode, "connected to local node");

        let version = inner
            .config
            .version
            .clone()
            .unwrap_or_else(|| "dev".to_string());
        let node_uri = inner.config.node_uri.clone().unwrap_or(enode);

        let resp = pool
            .connect(ConnectRequest {
                payout: inner.config.payout.clone(),
                node_uri: Some(node_uri),
                version,
                node_info: inner.node.user_agent(),
            })
            .await?;
        info!(pool_version = %resp.pool_version, "registered on pool");
        if let Some(message) = resp.message {
            let _ = inner.events.send(AgentEvent::PoolMessage(message));
        }

        // Bootstrap reconciliation before the ticker takes over.
        inner.update_peers(pool).await?;
        Ok(())
    }

    /// Trust a peer the pool has matched to this node. Called by the pool
    /// over RPC.
    pub async fn whitelist(&self, node_id: NodeId) -> Result<()> {
        info!(peer = %node_id, "whitelist request");
        self.inner.node.add_trusted_peer(&node_id).await?;
        Ok(())
    }

    /// Ask the update loop to finish. The in-flight tick completes first;
    /// the node's existing peers are left connected.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == AgentState::Running {
                *state = AgentState::Stopping;
            }
        }
        let stop_tx = self.stop_tx.lock().clone();
        if let Some(tx) = stop_tx {
            let _ = tx.send(()).await;
        }
    }

    /// Block until the agent has stopped; returns the terminal error, if
    /// the loop died on one.
    pub async fn wait(&self) -> Result<()> {
        let done_rx = self.done_rx.lock().take();
        match done_rx {
            Some(rx) => rx.await.unwrap_or(Ok(())),
            None => Ok(()),
        }
    }
}

async fn serve_updates(
    inner: Arc<AgentInner>,
    pool: Arc<dyn Pool>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let mut ticker = interval(inner.config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // An interval fires immediately; the bootstrap tick already ran.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match timeout(UPDATE_TIMEOUT, inner.update_peers(pool.as_ref())).await {
                    Ok(Ok(())) => {}
                    // Only a failed pool update (or a hung tick) kills the
                    // loop; everything else gets another chance next tick.
                    Ok(Err(e @ AgentError::UpdateFailed(_))) => return Err(e),
                    Ok(Err(e)) => warn!(error = %e, "tick failed; continuing"),
                    Err(_) => return Err(AgentError::TickDeadline),
                }
            }
            _ = stop_rx.recv() => {
                debug!("update loop stopping");
                return Ok(());
            }
        }
    }
}

impl AgentInner {
    /// One reconciliation tick: top up hosts if short, then report the
    /// current peer set and act on the pool's verdicts.
    async fn update_peers(&self, pool: &dyn Pool) -> Result<()> {
        let peers = self.node.peers().await?;

        let deficit = self.config.num_hosts.saturating_sub(peers.len());
        if deficit > 0 {
            self.add_peers(pool, deficit).await?;
        }

        let block_number = self.node.block_number().await?;
        let update = pool
            .update(UpdateRequest {
                peers: peers.clone(),
                block_number,
            })
            .await
            .map_err(AgentError::UpdateFailed)?;

        if let Some(balance) = update.balance.clone() {
            let _ = self.events.send(AgentEvent::Balance(balance));
        }
        let _ = self.events.send(AgentEvent::BlockNumber {
            node: block_number,
            pool: update.latest_block_number,
        });
        debug!(
            reported = peers.len(),
            active = update.active_peers.len(),
            invalid = update.invalid_peers.len(),
            "sent update"
        );

        let mut failures = Vec::new();
        for peer_id in &update.invalid_peers {
            if let Err(e) = self.node.remove_trusted_peer(peer_id).await {
                failures.push(e.to_string());
            }
            if let Err(e) = self.node.disconnect_peer(peer_id).await {
                failures.push(e.to_string());
            }
        }
        if !failures.is_empty() {
            return Err(AgentError::Aggregate(failures));
        }
        Ok(())
    }

    /// Request `num` more host candidates and connect to them.
    async fn add_peers(&self, pool: &dyn Pool, num: usize) -> Result<()> {
        let kind = self.node.user_agent().kind;
        debug!(num, %kind, "requesting more hosts from pool");
        let resp = pool
            .peer(PeerRequest {
                num,
                kind: Some(kind),
            })
            .await?;
        info!(candidates = resp.peers.len(), "received host candidates");
        for candidate in resp.peers {
            self.node.connect_peer(&candidate.uri).await?;
        }
        Ok(())
    }
}
