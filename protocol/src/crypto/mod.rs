//! # Cryptographic Primitives
//!
//! Everything the ledger needs to answer one question: *who agreed to this?*
//!
//! - **Keccak-256** for message digests and address derivation.
//! - **secp256k1 ECDSA with public key recovery** for consents. A signature
//!   identifies its signer on its own, so a consent can travel as
//!   `(payload, signature)` without a separate public key.
//! - **BLAKE3** for deterministic development identities.
//!
//! No custom crypto lives here. These are thin typed wrappers around the
//! RustCrypto and BLAKE3 implementations.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{keccak256, keccak256_concat};
pub use keys::{KeyError, Keypair};
pub use signatures::{recover_signer, verify_signer, RecoverableSignature, SignatureError};
