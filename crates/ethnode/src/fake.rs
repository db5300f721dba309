//! Scripted in-memory node
//!
//! Stands in for a real blockchain node in tests and single-process
//! clusters: keeps a mutable peer list and trust list, records every call,
//! and can be told to fail specific operations.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use peerlink_core::{parse_enode, NodeId, PeerInfo, UserAgent};
use peerlink_rpc::RpcError;

use crate::{EthnodeError, NodeAdapter, Result};

#[derive(Default)]
struct FakeState {
    peers: Vec<PeerInfo>,
    trusted: Vec<NodeId>,
    block_number: u64,
    calls: Vec<(String, String)>,
    failing: HashSet<String>,
}

pub struct FakeNode {
    id: NodeId,
    enode: String,
    agent: UserAgent,
    state: Mutex<FakeState>,
}

impl FakeNode {
    pub fn new(id: NodeId, agent: UserAgent) -> Self {
        Self {
            id,
            enode: format!("enode://{}@127.0.0.1:30303", id.to_hex()),
            agent,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Simulate the node-level peering the pool only hears about.
    pub fn add_peer(&self, peer: PeerInfo) {
        let mut state = self.state.lock();
        if !state.peers.iter().any(|p| p.id == peer.id) {
            state.peers.push(peer);
        }
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.state.lock().block_number = block_number;
    }

    pub fn current_peers(&self) -> Vec<PeerInfo> {
        self.state.lock().peers.clone()
    }

    pub fn trusted(&self) -> Vec<NodeId> {
        self.state.lock().trusted.clone()
    }

    /// Every adapter call made so far, as `(operation, argument)` pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().calls.clone()
    }

    /// Make the named operation fail until cleared.
    pub fn fail_on(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    fn record(&self, operation: &str, argument: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push((operation.to_string(), argument.into()));
        if state.failing.contains(operation) {
            return Err(EthnodeError::Remote(RpcError::Fault {
                code: -32000,
                message: format!("{operation} scripted to fail"),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeAdapter for FakeNode {
    async fn enode(&self) -> Result<String> {
        self.record("enode", "")?;
        Ok(self.enode.clone())
    }

    fn user_agent(&self) -> UserAgent {
        self.agent.clone()
    }

    async fn peers(&self) -> Result<Vec<PeerInfo>> {
        self.record("peers", "")?;
        Ok(self.state.lock().peers.clone())
    }

    async fn connect_peer(&self, uri: &str) -> Result<()> {
        self.record("connect_peer", uri)?;
        let parsed =
            parse_enode(uri).map_err(|e| EthnodeError::InvalidResponse(e.to_string()))?;
        self.add_peer(PeerInfo {
            id: parsed.id,
            enode: Some(uri.to_string()),
        });
        Ok(())
    }

    async fn disconnect_peer(&self, id: &NodeId) -> Result<()> {
        self.record("disconnect_peer", id.to_hex())?;
        self.state.lock().peers.retain(|p| p.id != *id);
        Ok(())
    }

    async fn add_trusted_peer(&self, id: &NodeId) -> Result<()> {
        self.record("add_trusted_peer", id.to_hex())?;
        let mut state = self.state.lock();
        if !state.trusted.contains(id) {
            state.trusted.push(*id);
        }
        Ok(())
    }

    async fn remove_trusted_peer(&self, id: &NodeId) -> Result<()> {
        self.record("remove_trusted_peer", id.to_hex())?;
        self.state.lock().trusted.retain(|t| t != id);
        Ok(())
    }

    async fn block_number(&self) -> Result<u64> {
        self.record("block_number", "")?;
        Ok(self.state.lock().block_number)
    }

    async fn check_compatible(&self) -> Result<()> {
        self.record("check_compatible", "")?;
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

    fn fake(first: u8) -> FakeNode {
        FakeNode::new(id_with(first), UserAgent::default())
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_peer() {
        let node = fake(1);
        let peer = fake(2);

        node.connect_peer(&peer.enode().await.unwrap()).await.unwrap();
        assert_eq!(node.peers().await.unwrap().len(), 1);

        node.disconnect_peer(&peer.id()).await.unwrap();
        assert!(node.peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trust_list() {
        let node = fake(1);
        let peer = id_with(2);

        node.add_trusted_peer(&peer).await.unwrap();
        node.add_trusted_peer(&peer).await.unwrap();
        assert_eq!(node.trusted(), vec![peer]);

        node.remove_trusted_peer(&peer).await.unwrap();
        assert!(node.trusted().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let node = fake(1);
        node.fail_on("disconnect_peer");

        let err = node.disconnect_peer(&id_with(2)).await.unwrap_err();
        assert!(matches!(err, EthnodeError::Remote(_)));

        node.clear_failures();
        node.disconnect_peer(&id_with(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_recording() {
        let node = fake(1);
        node.set_block_number(7);
        node.block_number().await.unwrap();
        node.enode().await.unwrap();

        let calls: Vec<String> = node.calls().into_iter().map(|(op, _)| op).collect();
        assert_eq!(calls, vec!["block_number", "enode"]);
    }
}
