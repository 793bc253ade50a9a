//! # Signer Recovery
//!
//! The ledger never asks "is this signature valid for key K?". It asks
//! "who signed this digest?" and compares the answer with the participant
//! whose consent an operation needs. That is ECDSA public key recovery:
//! from `(digest, r, s, v)` we get the signer's public key, and from the
//! public key their [`ParticipantId`].
//!
//! This lets a counterparty pre-sign a credit limit increase (or a freeze,
//! or a payment) that somebody else later submits, without either side
//! needing to be online at the same time.
//!
//! ## Wire format
//!
//! A [`RecoverableSignature`] is 65 bytes: `r (32) || s (32) || v (1)`.
//! `v` is accepted both as a raw recovery id (`0`/`1`) and in the
//! Ethereum convention (`27`/`28`); it is always emitted as `27`/`28`.
//!
//! ## Malleability
//!
//! High-`s` signatures are rejected. Every signature has exactly one
//! accepted encoding, so a consent cannot be replayed under a second form.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ETHEREUM_V_OFFSET, RECOVERABLE_SIGNATURE_LENGTH};
use crate::identity::ParticipantId;

/// Errors during signer recovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Malformed bytes, an out-of-range recovery id, a high-`s` value, or
    /// a signature that does not recover to any public key.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The signature is valid but was produced by someone else.
    #[error("unauthorized signer: expected {expected}, recovered {recovered}")]
    UnauthorizedSigner {
        /// The participant whose consent was required.
        expected: ParticipantId,
        /// The participant who actually signed.
        recovered: ParticipantId,
    },
}

/// A 65-byte recoverable ECDSA signature (`r || s || v`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoverableSignature {
    bytes: Vec<u8>,
}

impl RecoverableSignature {
    /// Assemble a signature from its 64-byte `r || s` part and a recovery id.
    ///
    /// The recovery id is normalized to the Ethereum convention.
    pub fn from_parts(rs: &[u8; 64], recovery_id: u8) -> Self {
        let mut bytes = Vec::with_capacity(RECOVERABLE_SIGNATURE_LENGTH);
        bytes.extend_from_slice(rs);
        bytes.push(if recovery_id < ETHEREUM_V_OFFSET {
            recovery_id + ETHEREUM_V_OFFSET
        } else {
            recovery_id
        });
        Self { bytes }
    }

    /// Wrap raw bytes received off the wire. Length is checked at recovery
    /// time, not here, so that malformed input reaches the verifier and is
    /// reported as [`SignatureError::InvalidSignature`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Parse a hex string (with or without `0x`).
    pub fn from_hex(hex_str: &str) -> Result<Self, SignatureError> {
        let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        hex::decode(stripped)
            .map(Self::from_bytes)
            .map_err(|e| SignatureError::InvalidSignature(format!("bad hex: {e}")))
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoverableSignature({})", self.to_hex())
    }
}

/// Recover the participant that produced `signature` over `digest`.
///
/// Pure and deterministic. Fails with [`SignatureError::InvalidSignature`]
/// if the bytes are malformed or do not correspond to a valid key recovery.
pub fn recover_signer(
    digest: &[u8; 32],
    signature: &RecoverableSignature,
) -> Result<ParticipantId, SignatureError> {
    let bytes = signature.as_bytes();
    if bytes.len() != RECOVERABLE_SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidSignature(format!(
            "expected {RECOVERABLE_SIGNATURE_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }

    let sig = Signature::from_slice(&bytes[..64])
        .map_err(|_| SignatureError::InvalidSignature("r or s out of range".into()))?;
    if sig.normalize_s().is_some() {
        return Err(SignatureError::InvalidSignature("non-canonical high s".into()));
    }

    let v = bytes[64];
    let raw_id = if v >= ETHEREUM_V_OFFSET {
        v - ETHEREUM_V_OFFSET
    } else {
        v
    };
    // Only 0 and 1 occur for secp256k1 in practice; x-reduced ids are refused.
    if raw_id > 1 {
        return Err(SignatureError::InvalidSignature(format!(
            "recovery id {v} out of range"
        )));
    }
    let recovery_id = RecoveryId::from_byte(raw_id)
        .ok_or_else(|| SignatureError::InvalidSignature(format!("recovery id {v} out of range")))?;

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| SignatureError::InvalidSignature("public key recovery failed".into()))?;

    Ok(ParticipantId::from_verifying_key(&key))
}

/// Recover the signer and require it to be `expected`.
///
/// Fails with [`SignatureError::UnauthorizedSigner`] when the signature is
/// well-formed but belongs to a different participant.
pub fn verify_signer(
    digest: &[u8; 32],
    signature: &RecoverableSignature,
    expected: &ParticipantId,
) -> Result<(), SignatureError> {
    let recovered = recover_signer(digest, signature)?;
    if recovered != *expected {
        return Err(SignatureError::UnauthorizedSigner {
            expected: *expected,
            recovered,
        });
    }
    Ok(())
}
