//! # Storage Module
//!
//! What a trustline looks like at rest, and where it can be put.
//!
//! ```text
//! record.rs : TrustlineRecord (fixed 8-field bincode layout), status, StoredTrustline
//! store.rs  : TrustlineStore trait and the in-memory MemoryStore
//! ```
//!
//! Bincode for storage, JSON for configs and debugging. The record layout is
//! the contract between the ledger and any back-end; changing field order
//! breaks every stored trustline.

pub mod record;
pub mod store;

pub use record::{StoredTrustline, TrustlineRecord, TrustlineStatus};
pub use store::{MemoryStore, TrustlineStore};

use crate::identity::ParticipantId;

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Pairs are stored with the smaller address first.
    #[error("trustline pair not in canonical order: {a} >= {b}")]
    NonCanonicalPair { a: ParticipantId, b: ParticipantId },
}

pub type StorageResult<T> = Result<T, StorageError>;
