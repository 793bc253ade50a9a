//! # Trustline Stores
//!
//! The ledger keeps its working state in memory. A [`TrustlineStore`] is
//! where that state goes when a host wants to keep it: export the network,
//! write every [`StoredTrustline`], read them back, restore.
//!
//! Only [`MemoryStore`] ships here. Anything durable implements the trait
//! outside this crate.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{StorageResult, StoredTrustline};
use crate::identity::ParticipantId;

/// Keyed storage for trustlines. Keys are the canonical pair `(a, b)` with
/// `a < b`; implementations may assume callers respect that.
pub trait TrustlineStore: Send + Sync {
    /// Insert or overwrite the trustline for its pair.
    fn store(&self, entry: &StoredTrustline) -> StorageResult<()>;

    /// The stored trustline for a pair, if any.
    fn get(&self, a: &ParticipantId, b: &ParticipantId) -> StorageResult<Option<StoredTrustline>>;

    /// Every stored trustline, ordered by pair.
    fn load_all(&self) -> StorageResult<Vec<StoredTrustline>>;
}

/// An in-memory [`TrustlineStore`]. Entries are kept in bincode form so the
/// record codec is exercised on every round-trip, as it would be on disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(ParticipantId, ParticipantId), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored trustlines.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn encode(entry: &StoredTrustline) -> StorageResult<Vec<u8>> {
    bincode::serialize(entry).map_err(|e| super::StorageError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> StorageResult<StoredTrustline> {
    bincode::deserialize(bytes).map_err(|e| super::StorageError::Serialization(e.to_string()))
}

impl TrustlineStore for MemoryStore {
    fn store(&self, entry: &StoredTrustline) -> StorageResult<()> {
        let record = &entry.record;
        if record.participant_a >= record.participant_b {
            return Err(super::StorageError::NonCanonicalPair {
                a: record.participant_a,
                b: record.participant_b,
            });
        }
        let bytes = encode(entry)?;
        self.entries
            .write()
            .insert((record.participant_a, record.participant_b), bytes);
        Ok(())
    }

    fn get(&self, a: &ParticipantId, b: &ParticipantId) -> StorageResult<Option<StoredTrustline>> {
        self.entries
            .read()
            .get(&(*a, *b))
            .map(|bytes| decode(bytes))
            .transpose()
    }

    fn load_all(&self) -> StorageResult<Vec<StoredTrustline>> {
        self.entries.read().values().map(|bytes| decode(bytes)).collect()
    }
}
