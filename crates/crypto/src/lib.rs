//! PeerLink crypto
//!
//! secp256k1 node identities and the recoverable request signatures used by
//! the pool's auth envelope. A NodeId is the 64-byte uncompressed public key
//! (SEC1 tag stripped), so verifying a request is: recover the key from the
//! signature, derive the id, compare with the claimed one.

mod keys;
mod sign;

pub use keys::Keypair;
pub use sign::{keccak256, recover_node_id, sign_digest, verify_digest, SIGNATURE_LEN};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
