//! Agent RPC surface
//!
//! The agent exposes exactly one method to its pool: `peerlink_whitelist`,
//! called when a new client has been matched to this host. The handler runs
//! on the same connection the agent uses for its own pool calls.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use peerlink_core::NodeId;
use peerlink_pool::methods;
use peerlink_rpc::{RpcFault, RpcHandler};

use crate::agent::Agent;

pub struct AgentConnection {
    agent: Arc<Agent>,
}

impl AgentConnection {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }
}

impl RpcHandler for AgentConnection {
    fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, RpcFault>> + Send + '_>>
    {
        let method = method.to_string();
        Box::pin(async move {
            if method != methods::WHITELIST {
                return Err(RpcFault::method_not_found(&method));
            }
            let node_id: NodeId = params
                .as_ref()
                .and_then(|p| p.get(0))
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| RpcFault::new(-32602, "expected [node_id]"))?;

            self.agent
                .whitelist(node_id)
                .await
                .map_err(|e| RpcFault::new(-32000, e.to_string()))?;
            Ok(serde_json::Value::Null)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use peerlink_core::UserAgent;
    use peerlink_ethnode::FakeNode;

    fn id_with(first: u8) -> NodeId {
        let mut bytes = [0u8; 64];
        bytes[0] = first;
        NodeId::from_bytes(bytes)
    }

    #[tokio::test]
    async fn test_whitelist_adds_trusted_peer() {
        let node = Arc::new(FakeNode::new(id_with(1), UserAgent::default()));
        let agent = Arc::new(Agent::new(node.clone(), AgentConfig::default()));
        let connection = AgentConnection::new(agent);

        let peer = id_with(2);
        let result = connection
            .handle(
                methods::WHITELIST,
                Some(serde_json::json!([peer.to_hex()])),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::Value::Null);
        assert_eq!(node.trusted(), vec![peer]);
    }

    #[tokio::test]
    async fn test_rejects_other_methods() {
        let node = Arc::new(FakeNode::new(id_with(1), UserAgent::default()));
        let agent = Arc::new(Agent::new(node, AgentConfig::default()));
        let connection = AgentConnection::new(agent);

        let err = connection.handle("peerlink_update", None).await.unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[tokio::test]
    async fn test_bad_params() {
        let node = Arc::new(FakeNode::new(id_with(1), UserAgent::default()));
        let agent = Arc::new(Agent::new(node, AgentConfig::default()));
        let connection = AgentConnection::new(agent);

        let err = connection
            .handle(methods::WHITELIST, Some(serde_json::json!(["nothex"])))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }
}
