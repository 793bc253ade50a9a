//! # Key Management
//!
//! secp256k1 keypairs for network participants.
//!
//! Key custody is somebody else's problem (wallets). This module exists so
//! that the ledger, its tests and embedding hosts can produce the same kind
//! of recoverable signatures a wallet would, and map a key to the
//! [`ParticipantId`] that trustlines refer to.
//!
//! ## Security considerations
//!
//! - Fresh keys come from `OsRng`.
//! - `from_label` keys are derived from a public string. They are for
//!   fixtures and demos only.
//! - `Keypair` does not implement `Serialize`. Exporting a secret should be
//!   a deliberate call to [`Keypair::secret_bytes`], not a side effect of
//!   shoving a struct into JSON.

use std::fmt;

use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use thiserror::Error;

use super::hash::derive_seed;
use super::signatures::RecoverableSignature;
use crate::identity::ParticipantId;

/// Errors that can occur during key operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The bytes are not a valid secp256k1 scalar (zero or >= curve order).
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    /// Signing failed inside the ECDSA implementation.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A participant's secp256k1 signing key.
///
/// ```
/// use trustline_protocol::crypto::{recover_signer, Keypair};
///
/// let kp = Keypair::from_label("alice");
/// let digest = [7u8; 32];
/// let sig = kp.sign_digest(&digest).unwrap();
/// assert_eq!(recover_signer(&digest, &sig).unwrap(), kp.participant_id());
/// ```
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    participant: ParticipantId,
}

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Build a keypair from 32 bytes of secret key material.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(seed).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Deterministic keypair for a human-readable label.
    ///
    /// A BLAKE3-derived seed is outside the valid scalar range with
    /// probability ~2^-128; should it ever happen, the seed is re-hashed.
    pub fn from_label(label: &str) -> Self {
        let mut seed = derive_seed(label);
        loop {
            if let Ok(kp) = Self::from_seed(&seed) {
                return kp;
            }
            seed = *blake3::hash(&seed).as_bytes();
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret (with or without `0x`).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(stripped).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Self::from_seed(&seed)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let participant = ParticipantId::from_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            participant,
        }
    }

    /// The address this key signs for.
    pub fn participant_id(&self) -> ParticipantId {
        self.participant
    }

    /// Sign a 32-byte message digest, producing a recoverable signature.
    ///
    /// The digest is signed as-is (no additional hashing), so the verifier
    /// must recover against the very same digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, KeyError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| KeyError::SigningFailed(e.to_string()))?;
        let mut rs = [0u8; 64];
        rs.copy_from_slice(&signature.to_bytes());
        Ok(RecoverableSignature::from_parts(&rs, recovery_id.to_byte()))
    }

    /// Exports the raw 32-byte secret. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&self.signing_key.to_bytes());
        secret
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret.
        f.debug_struct("Keypair")
            .field("participant", &self.participant)
            .finish_non_exhaustive()
    }
}
