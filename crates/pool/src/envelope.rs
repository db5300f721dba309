//! Authenticated request envelope
//!
//! Every client→pool call is wrapped in `{node_id, nonce, args_hash, sig}`
//! where the signature covers `node_id ‖ method ‖ nonce ‖ args_hash`. There
//! are no sessions: each call stands alone, bound to a node identity by key
//! recovery and to a point in time by the nonce.
//!
//! Two failure kinds are distinguished on verification: a signature that
//! does not recover to the claimed id is `InvalidSignature`; a valid
//! signature whose args hash does not match the args actually transmitted
//! is `SecurityViolation` (someone rewrote the args in flight).

use serde::{Deserialize, Serialize};

use peerlink_core::NodeId;
use peerlink_crypto::{keccak256, recover_node_id, sign_digest, Keypair};

use crate::{PoolError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEnvelope {
    pub node_id: NodeId,
    /// Strictly increasing per node; nanosecond wall time works well.
    pub nonce: i64,
    /// Keccak-256 of the serialized method args, hex encoded.
    pub args_hash: String,
    /// 65-byte recoverable signature, hex encoded.
    pub sig: String,
}

fn args_digest(args: &serde_json::Value) -> [u8; 32] {
    keccak256(args.to_string().as_bytes())
}

/// The digest a caller signs: identity, method, nonce, and the hash of the
/// serialized method args, all bound together.
fn signing_digest(
    node_id: &NodeId,
    method: &str,
    nonce: i64,
    args_hash: &[u8; 32],
) -> [u8; 32] {
    let mut payload = Vec::with_capacity(128 + method.len() + 20 + 32);
    payload.extend_from_slice(node_id.to_hex().as_bytes());
    payload.extend_from_slice(method.as_bytes());
    payload.extend_from_slice(nonce.to_string().as_bytes());
    payload.extend_from_slice(args_hash);
    keccak256(&payload)
}

impl AuthEnvelope {
    /// Sign a call on behalf of `keypair`.
    pub fn sign(
        keypair: &Keypair,
        method: &str,
        nonce: i64,
        args: &serde_json::Value,
    ) -> Result<Self> {
        let node_id = keypair.node_id();
        let args_hash = args_digest(args);
        let digest = signing_digest(&node_id, method, nonce, &args_hash);
        let sig = sign_digest(keypair, &digest).map_err(|_| PoolError::InvalidSignature)?;
        Ok(Self {
            node_id,
            nonce,
            args_hash: hex::encode(args_hash),
            sig: hex::encode(sig),
        })
    }

    /// Verify the envelope against the method and args actually received.
    /// Returns the caller's NodeId on success.
    pub fn verify(&self, method: &str, args: &serde_json::Value) -> Result<NodeId> {
        let sig = hex::decode(&self.sig).map_err(|_| PoolError::InvalidSignature)?;
        let claimed_hash: [u8; 32] = hex::decode(&self.args_hash)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(PoolError::InvalidSignature)?;

        let digest = signing_digest(&self.node_id, method, self.nonce, &claimed_hash);
        let recovered = recover_node_id(&digest, &sig).map_err(|_| PoolError::InvalidSignature)?;
        if recovered != self.node_id {
            return Err(PoolError::InvalidSignature);
        }

        // The signature checks out; now make sure it signs the args we were
        // actually given.
        if args_digest(args) != claimed_hash {
            return Err(PoolError::SecurityViolation(
                "request args do not match the signed args hash".to_string(),
            ));
        }
        Ok(recovered)
    }
}
