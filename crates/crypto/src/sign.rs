use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use peerlink_core::NodeId;

use crate::keys::{node_id_from_key, Keypair};
use crate::{CryptoError, Result};

/// Wire length of a recoverable signature: r ‖ s ‖ v.
pub const SIGNATURE_LEN: usize = 65;

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Sign a 32-byte digest, producing a 65-byte recoverable signature.
pub fn sign_digest(keypair: &Keypair, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN]> {
    let (signature, recovery_id) = keypair
        .signing_key()
        .sign_prehash_recoverable(digest)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte();
    Ok(out)
}

/// Recover the signer's NodeId from a digest and a 65-byte signature.
pub fn recover_node_id(digest: &[u8; 32], sig: &[u8]) -> Result<NodeId> {
    if sig.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LEN,
            sig.len()
        )));
    }

    let signature = Signature::from_slice(&sig[..64])
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(sig[64])
        .ok_or_else(|| CryptoError::InvalidSignature(format!("bad recovery byte {}", sig[64])))?;

    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    Ok(node_id_from_key(&key))
}

/// Check that `sig` over `digest` recovers to `expected`.
pub fn verify_digest(expected: &NodeId, digest: &[u8; 32], sig: &[u8]) -> bool {
    matches!(recover_node_id(digest, sig), Ok(id) if id == *expected)
}
