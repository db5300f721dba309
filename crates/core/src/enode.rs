//! enode URI parsing and comparison
//!
//! Grammar: `enode://<128-hex-pubkey>@<host>:<port>`. Peer reconciliation
//! compares URIs with a wildcard-host rule: a node that listens on all
//! interfaces advertises `[::]` or `0.0.0.0`, which matches any concrete
//! host on the other side.

use std::fmt;
use std::str::FromStr;

use crate::{CoreError, NodeId};

/// A parsed enode URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnodeUri {
    pub id: NodeId,
    pub host: String,
    pub port: Option<u16>,
}

impl EnodeUri {
    /// True when the host is unspecified or a bind-anything address.
    pub fn is_wildcard_host(&self) -> bool {
        matches!(self.host.as_str(), "" | "[::]" | "::" | "0.0.0.0")
    }

    /// Equality rule used when reconciling peer lists: public keys must
    /// match; then either host is a wildcard, or both hosts match literally.
    /// When both sides also carry a port, the ports must match too.
    pub fn matches(&self, other: &EnodeUri) -> bool {
        if self.id != other.id {
            return false;
        }
        if self.is_wildcard_host() || other.is_wildcard_host() {
            return true;
        }
        if self.host != other.host {
            return false;
        }
        match (self.port, other.port) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl FromStr for EnodeUri {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_enode(s)
    }
}

impl fmt::Display for EnodeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "enode://{}@{}:{}", self.id, self.host, port),
            None => write!(f, "enode://{}@{}", self.id, self.host),
        }
    }
}

/// Parse an `enode://<hex-pubkey>@<host>:<port>` string.
pub fn parse_enode(uri: &str) -> Result<EnodeUri, CoreError> {
    let rest = uri
        .strip_prefix("enode://")
        .ok_or_else(|| CoreError::InvalidEnode(format!("missing enode:// scheme: {uri}")))?;

    let (id_part, addr) = rest
        .split_once('@')
        .ok_or_else(|| CoreError::InvalidEnode(format!("missing @host part: {uri}")))?;

    let id: NodeId = id_part
        .parse()
        .map_err(|_| CoreError::InvalidEnode(format!("bad public key in {uri}")))?;

    // Bracketed IPv6 hosts contain colons, so split on the bracket first.
    let (host, port_part) = if let Some(rest) = addr.strip_prefix('[') {
        let (inner, tail) = rest
            .split_once(']')
            .ok_or_else(|| CoreError::InvalidEnode(format!("unterminated IPv6 host: {uri}")))?;
        (format!("[{inner}]"), tail.strip_prefix(':'))
    } else {
        match addr.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), Some(p)),
            None => (addr.to_string(), None),
        }
    };

    let port = match port_part {
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| CoreError::InvalidEnode(format!("bad port in {uri}")))?,
        ),
        None => None,
    };

    Ok(EnodeUri { id, host, port })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_id(first: u8) -> String {
        let mut bytes = [0u8; 64];
        bytes[0] = first;
        hex::encode(bytes)
    }

    fn enode(first: u8, addr: &str) -> EnodeUri {
        format!("enode://{}@{}", hex_id(first), addr).parse().unwrap()
    }

    #[test]
    fn test_parse_basic() {
        let uri = enode(0xaa, "127.0.0.1:30303");
        assert_eq!(uri.host, "127.0.0.1");
        assert_eq!(uri.port, Some(30303));
        assert!(!uri.is_wildcard_host());
    }

    #[test]
    fn test_parse_ipv6() {
        let uri = enode(0xaa, "[::]:30303");
        assert_eq!(uri.host, "[::]");
        assert_eq!(uri.port, Some(30303));
        assert!(uri.is_wildcard_host());
    }

    #[test]
    fn test_parse_no_port() {
        let uri = enode(0xaa, "example.com");
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_enode("http://foo@bar:1").is_err());
        assert!(parse_enode("enode://nothex@1.2.3.4:5").is_err());
        assert!(parse_enode(&format!("enode://{}", hex_id(1))).is_err());
        assert!(parse_enode(&format!("enode://{}@host:notaport", hex_id(1))).is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let uri = enode(0xbb, "10.0.0.1:30303");
        assert_eq!(uri.to_string().parse::<EnodeUri>().unwrap(), uri);
    }

    #[test]
    fn test_matches_reflexive_and_symmetric() {
        let cases = [
            enode(1, "127.0.0.1:30303"),
            enode(1, "[::]:30303"),
            enode(2, "example.com"),
        ];
        for a in &cases {
            assert!(a.matches(a));
            for b in &cases {
                assert_eq!(a.matches(b), b.matches(a));
            }
        }
    }

    #[test]
    fn test_matches_wildcard_host() {
        let concrete = enode(1, "203.0.113.7:30303");
        let wildcard = enode(1, "[::]:30303");
        let zeros = enode(1, "0.0.0.0:9999");
        assert!(concrete.matches(&wildcard));
        assert!(concrete.matches(&zeros));
    }

    #[test]
    fn test_matches_requires_same_key() {
        let a = enode(1, "[::]:30303");
        let b = enode(2, "[::]:30303");
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_matches_host_and_port() {
        let a = enode(1, "10.0.0.1:30303");
        let b = enode(1, "10.0.0.1:30303");
        let other_port = enode(1, "10.0.0.1:30304");
        let other_host = enode(1, "10.0.0.2:30303");
        let portless = enode(1, "10.0.0.1");
        assert!(a.matches(&b));
        assert!(!a.matches(&other_port));
        assert!(!a.matches(&other_host));
        assert!(a.matches(&portless));
    }
}
