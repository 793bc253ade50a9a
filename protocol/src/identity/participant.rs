//! # Participant Addresses
//!
//! A participant is identified by a 20-byte address derived from its
//! secp256k1 public key, the same way Ethereum derives account addresses:
//!
//! ```text
//! uncompressed_pubkey (65 bytes, 0x04 || x || y)
//!     -> keccak256(x || y) -> 32 bytes
//!     -> last 20 bytes     -> 0x5aAe...
//! ```
//!
//! Addresses are immutable and compared by byte equality. They are also
//! totally ordered by their bytes, which the currency network relies on to
//! orient trustlines canonically and to lock them in a deadlock-free order.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::VerifyingKey;
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PARTICIPANT_ID_LENGTH;
use crate::crypto::hash::keccak256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing a participant address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The string was not valid hex.
    #[error("invalid hex in participant address: {0}")]
    InvalidHex(String),

    /// The decoded address has the wrong length.
    #[error("invalid participant address length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// ParticipantId
// ---------------------------------------------------------------------------

/// An opaque, fixed-length participant identifier.
///
/// # Examples
///
/// ```
/// use trustline_protocol::identity::ParticipantId;
///
/// let id: ParticipantId = "0x00000000000000000000000000000000000000aa".parse().unwrap();
/// assert_eq!(id.to_string(), "0x00000000000000000000000000000000000000aa");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId([u8; PARTICIPANT_ID_LENGTH]);

impl ParticipantId {
    /// Wraps raw address bytes.
    pub const fn from_bytes(bytes: [u8; PARTICIPANT_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives the address of a secp256k1 verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let encoded = key.to_encoded_point(false);
        // Skip the 0x04 SEC1 tag, hash the 64 bytes of (x, y).
        let hash = keccak256(&encoded.as_bytes()[1..]);
        let mut bytes = [0u8; PARTICIPANT_ID_LENGTH];
        bytes.copy_from_slice(&hash[32 - PARTICIPANT_ID_LENGTH..]);
        Self(bytes)
    }

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; PARTICIPANT_ID_LENGTH] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({self})")
    }
}

impl FromStr for ParticipantId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| IdentityError::InvalidHex(e.to_string()))?;
        if bytes.len() != PARTICIPANT_ID_LENGTH {
            return Err(IdentityError::InvalidLength {
                expected: PARTICIPANT_ID_LENGTH,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; PARTICIPANT_ID_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}
