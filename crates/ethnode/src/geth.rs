//! Geth adapter
//!
//! Drives a go-ethereum node through its `admin_*` and `eth_*` RPC methods.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use peerlink_core::{NetworkId, NodeId, NodeKind, PeerInfo, UserAgent};
use peerlink_rpc::{codes, Remote, RpcError};

use crate::{EthnodeError, NodeAdapter, Result};

pub struct GethNode {
    client: Remote,
    agent: UserAgent,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    enode: String,
}

#[derive(Debug, Deserialize)]
struct RawPeer {
    id: String,
    #[serde(default)]
    enode: Option<String>,
}

/// Derive a [`UserAgent`] from what the node reports about itself:
/// `web3_clientVersion`, `eth_protocolVersion`, and `net_version`.
///
/// Light clients speak their own sync protocols whose version numbers fall
/// outside the eth range: les reports 10002, Parity's pip reports 1, while
/// full eth peers report 62/63/64. That gap is the full-node signal.
fn parse_user_agent(
    client_version: &str,
    protocol_version: &str,
    net_version: &str,
) -> Result<UserAgent> {
    let protocol = parse_quantity(protocol_version)?;
    Ok(UserAgent {
        kind: NodeKind::from_client_version(client_version),
        network: NetworkId::from_id(net_version.parse().unwrap_or(0)),
        is_full_node: (62..10_000).contains(&protocol),
        version: client_version.to_string(),
    })
}

impl GethNode {
    /// Attach to a node and detect its user agent.
    pub async fn attach(client: Remote) -> Result<Self> {
        let banner: String = call(&client, "web3_clientVersion", serde_json::json!([])).await?;
        let protocol: String =
            call(&client, "eth_protocolVersion", serde_json::json!([])).await?;
        let net: String = call(&client, "net_version", serde_json::json!([])).await?;

        let agent = parse_user_agent(&banner, &protocol, &net)?;
        debug!(kind = %agent.kind, network = %agent.network, full = agent.is_full_node,
               "attached to node");
        Ok(Self { client, agent })
    }

    #[cfg(test)]
    fn with_agent(client: Remote, agent: UserAgent) -> Self {
        Self { client, agent }
    }
}

async fn call<T: DeserializeOwned>(
    client: &Remote,
    method: &str,
    params: serde_json::Value,
) -> Result<T> {
    let result = client.call(method, Some(params)).await?;
    serde_json::from_value(result).map_err(|e| EthnodeError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl NodeAdapter for GethNode {
    async fn enode(&self) -> Result<String> {
        let info: NodeInfo = call(&self.client, "admin_nodeInfo", serde_json::json!([])).await?;
        Ok(info.enode)
    }

    fn user_agent(&self) -> UserAgent {
        self.agent.clone()
    }

    async fn peers(&self) -> Result<Vec<PeerInfo>> {
        let raw: Vec<RawPeer> = call(&self.client, "admin_peers", serde_json::json!([])).await?;
        let mut peers = Vec::with_capacity(raw.len());
        for peer in raw {
            match peer.id.parse::<NodeId>() {
                Ok(id) => peers.push(PeerInfo {
                    id,
                    enode: peer.enode,
                }),
                Err(_) => warn!(id = %peer.id, "skipping peer with malformed id"),
            }
        }
        Ok(peers)
    }

    async fn connect_peer(&self, uri: &str) -> Result<()> {
        // The result is always true, not worth checking.
        let _: serde_json::Value =
            call(&self.client, "admin_addPeer", serde_json::json!([uri])).await?;
        Ok(())
    }

    async fn disconnect_peer(&self, id: &NodeId) -> Result<()> {
        let _: serde_json::Value = call(
            &self.client,
            "admin_removePeer",
            serde_json::json!([id.to_hex()]),
        )
        .await?;
        Ok(())
    }

    async fn add_trusted_peer(&self, id: &NodeId) -> Result<()> {
        let _: serde_json::Value = call(
            &self.client,
            "admin_addTrustedPeer",
            serde_json::json!([id.to_hex()]),
        )
        .await?;
        Ok(())
    }

    async fn remove_trusted_peer(&self, id: &NodeId) -> Result<()> {
        let _: serde_json::Value = call(
            &self.client,
            "admin_removeTrustedPeer",
            serde_json::json!([id.to_hex()]),
        )
        .await?;
        Ok(())
    }

    async fn block_number(&self) -> Result<u64> {
        let quantity: String =
            call(&self.client, "eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&quantity)
    }

    async fn check_compatible(&self) -> Result<()> {
        // Probe with an argument the node must reject: a well-formed error
        // means the admin surface is there, method-not-found means it isn't,
        // and silent acceptance means this is not the node we think it is.
        let probe = self
            .client
            .call("admin_addTrustedPeer", Some(serde_json::json!([""])))
            .await;
        match probe {
            Ok(_) => Err(EthnodeError::Unsupported(
                "admin_addTrustedPeer accepted an empty id".to_string(),
            )),
            Err(RpcError::Fault { code, message }) if code == codes::METHOD_NOT_FOUND => {
                Err(EthnodeError::Unsupported(message))
            }
            Err(RpcError::Fault { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse an `eth_blockNumber`-style quantity: `0x`-prefixed hex or decimal.
fn parse_quantity(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| EthnodeError::InvalidResponse(format!("bad quantity {s:?}")))
}
