use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// 64-byte public-key-derived node identifier.
///
/// The canonical wire form is 128 lowercase hex characters (the uncompressed
/// secp256k1 public key without the SEC1 tag byte). `FromStr` also accepts a
/// `0x` prefix and uppercase digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 64]);

impl NodeId {
    pub const LEN: usize = 64;

    /// The all-zero id. Representable so stores can reject it explicitly.
    pub const ZERO: NodeId = NodeId([0u8; 64]);

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Canonical lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for NodeId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidNodeId(e.to_string()))?;
        if bytes.len() != Self::LEN {
            return Err(CoreError::InvalidNodeId(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut id = [0u8; 64];
        id.copy_from_slice(&bytes);
        Ok(NodeId(id))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full ids are unreadable in logs; the first 8 bytes are plenty.
        write!(f, "NodeId({}…)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Node implementation family. Matchmaking partitions by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Geth,
    Parity,
    Unknown,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Geth => "geth",
            NodeKind::Parity => "parity",
            NodeKind::Unknown => "unknown",
        }
    }

    /// Detect the kind from a client version banner such as
    /// `Geth/v1.8.21-stable/linux-amd64/go1.11`.
    pub fn from_client_version(banner: &str) -> Self {
        let family = banner.split('/').next().unwrap_or("");
        match family.to_ascii_lowercase().as_str() {
            "geth" | "go-ethereum" => NodeKind::Geth,
            "parity" | "parity-ethereum" | "openethereum" => NodeKind::Parity,
            _ => NodeKind::Unknown,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain the node belongs to. Matchmaking never crosses networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,
    Ropsten,
    Rinkeby,
    Kovan,
    Unknown,
}

impl NetworkId {
    /// Map the numeric id reported by `net_version`.
    pub fn from_id(id: u64) -> Self {
        match id {
            1 => NetworkId::Mainnet,
            3 => NetworkId::Ropsten,
            4 => NetworkId::Rinkeby,
            42 => NetworkId::Kovan,
            _ => NetworkId::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "mainnet",
            NetworkId::Ropsten => "ropsten",
            NetworkId::Rinkeby => "rinkeby",
            NetworkId::Kovan => "kovan",
            NetworkId::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a node reports about itself when it connects to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgent {
    pub kind: NodeKind,
    pub network: NetworkId,
    pub is_full_node: bool,
    pub version: String,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            kind: NodeKind::Unknown,
            network: NetworkId::Unknown,
            is_full_node: false,
            version: String::new(),
        }
    }
}

/// One entry of a node's reported peer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enode: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with(first: u8) -> NodeId {
        let mut bytes = [0u8; 64];
        bytes[0] = first;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn test_node_id_hex_roundtrip() {
        let id = id_with(0xab);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 128);
        assert_eq!(hex.parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn test_node_id_accepts_0x_prefix() {
        let id = id_with(0x42);
        let prefixed = format!("0x{}", id.to_hex());
        assert_eq!(prefixed.parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn test_node_id_rejects_wrong_length() {
        assert!("abcd".parse::<NodeId>().is_err());
        assert!("".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_rejects_non_hex() {
        let bad = "zz".repeat(64);
        assert!(bad.parse::<NodeId>().is_err());
    }

    #[test]
    fn test_zero_id() {
        assert!(NodeId::ZERO.is_zero());
        assert!(!id_with(1).is_zero());
    }

    #[test]
    fn test_node_id_serde_is_hex_string() {
        let id = id_with(0x11);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_node_id_ordering_is_deterministic() {
        let mut ids = vec![id_with(3), id_with(1), id_with(2)];
        ids.sort();
        assert_eq!(ids, vec![id_with(1), id_with(2), id_with(3)]);
    }

    #[test]
    fn test_kind_from_client_version() {
        assert_eq!(
            NodeKind::from_client_version("Geth/v1.8.21-stable/linux-amd64/go1.11"),
            NodeKind::Geth
        );
        assert_eq!(
            NodeKind::from_client_version("Parity-Ethereum/v2.2.7/x86_64-linux-gnu"),
            NodeKind::Parity
        );
        assert_eq!(NodeKind::from_client_version("besu/21.1"), NodeKind::Unknown);
    }

    #[test]
    fn test_network_from_id() {
        assert_eq!(NetworkId::from_id(1), NetworkId::Mainnet);
        assert_eq!(NetworkId::from_id(3), NetworkId::Ropsten);
        assert_eq!(NetworkId::from_id(99999), NetworkId::Unknown);
    }
}
