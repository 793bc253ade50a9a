//! # Trustline Record
//!
//! The storage contract for one trustline. Eight fields in a fixed order,
//! encoded with bincode's default options (fixed-width integers, little
//! endian), so every record is exactly [`TrustlineRecord::ENCODED_LEN`]
//! bytes and the encoding is stable across builds.
//!
//! | Field                     | Type    | Bytes |
//! |---------------------------|---------|-------|
//! | `participant_a`           | address | 20    |
//! | `participant_b`           | address | 20    |
//! | `creditline_ab`           | u64     | 8     |
//! | `creditline_ba`           | u64     | 8     |
//! | `balance`                 | i128    | 16    |
//! | `interest_rate_ab`        | u16     | 2     |
//! | `interest_rate_ba`        | u16     | 2     |
//! | `last_interest_timestamp` | u64     | 8     |
//!
//! The status of a trustline is not part of the record. Back-ends that
//! need it store a [`StoredTrustline`].

use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::identity::ParticipantId;

/// Persistent state of one trustline, in canonical orientation
/// (`participant_a < participant_b`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlineRecord {
    pub participant_a: ParticipantId,
    pub participant_b: ParticipantId,
    /// Credit A extends to B: the most B may owe A.
    pub creditline_ab: u64,
    /// Credit B extends to A: the most A may owe B.
    pub creditline_ba: u64,
    /// Positive: B owes A. Negative: A owes B.
    pub balance: i128,
    /// Rate (bps) A charges on positive balances.
    pub interest_rate_ab: u16,
    /// Rate (bps) B charges on negative balances.
    pub interest_rate_ba: u16,
    pub last_interest_timestamp: u64,
}

impl TrustlineRecord {
    /// Size of the bincode encoding.
    pub const ENCODED_LEN: usize = 20 + 20 + 8 + 8 + 16 + 2 + 2 + 8;

    /// An all-zero record for a pair, as it exists before anyone opens it.
    pub fn empty(participant_a: ParticipantId, participant_b: ParticipantId) -> Self {
        Self {
            participant_a,
            participant_b,
            creditline_ab: 0,
            creditline_ba: 0,
            balance: 0,
            interest_rate_ab: 0,
            interest_rate_ba: 0,
            last_interest_timestamp: 0,
        }
    }

    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode a record produced by [`TrustlineRecord::to_bytes`].
    /// Trailing bytes are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(StorageError::Serialization(format!(
                "trustline record must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }
        bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Lifecycle state of a trustline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrustlineStatus {
    /// Nobody has extended credit yet, or the line was closed.
    #[default]
    Unestablished,
    /// Open for transfers.
    Active,
    /// Both parties agreed to stop all movement on the line.
    Frozen,
}

/// A record plus its status: the unit of export, import and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTrustline {
    pub record: TrustlineRecord,
    pub status: TrustlineStatus,
}
