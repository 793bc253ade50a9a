//! # Hashing Utilities
//!
//! Two hash functions, two jobs:
//!
//! - **Keccak-256**: message digests and address derivation. Signatures in
//!   this network are recoverable secp256k1 ECDSA over a 32-byte Keccak
//!   digest, the same construction EVM tooling produces, so wallets can sign
//!   trustline consents without special support.
//!
//! - **BLAKE3** (key derivation mode): turning a human label into a
//!   deterministic 32-byte seed for development and test identities.
//!   Never use labelled keys for real funds.

use sha3::{Digest, Keccak256};

/// Domain separation context for labelled key derivation.
const LABEL_SEED_CONTEXT: &str = "trustline-network 2026 labelled identity seed";

/// Compute the Keccak-256 hash of the input data.
///
/// ```
/// use trustline_protocol::crypto::keccak256;
///
/// let digest = keccak256(b"");
/// assert_eq!(
///     hex::encode(digest),
///     "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
/// );
/// ```
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over the concatenation of several byte slices, without
/// allocating the concatenation.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Derive a 32-byte seed from a label.
///
/// Deterministic: the same label always gives the same seed.
pub fn derive_seed(label: &str) -> [u8; 32] {
    blake3::derive_key(LABEL_SEED_CONTEXT, label.as_bytes())
}
