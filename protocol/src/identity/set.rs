//! # Insertion-Ordered Identity Set
//!
//! The network needs to enumerate "all users" and "everyone X has a
//! trustline with" deterministically, in the order those relationships
//! were registered. A `HashSet` forgets the order; a `BTreeSet` sorts.
//! This set keeps a `Vec` for order and a `HashMap` from member to index
//! for O(1) membership checks.
//!
//! Removal is O(n) because the remaining members shift down to preserve
//! their relative order. Removals are rare (closing a trustline), lookups
//! and inserts are the hot path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ParticipantId;

/// A set of participants that remembers insertion order.
///
/// ```
/// use trustline_protocol::identity::{IdentitySet, ParticipantId};
///
/// let a = ParticipantId::from_bytes([1; 20]);
/// let b = ParticipantId::from_bytes([2; 20]);
///
/// let mut set = IdentitySet::new();
/// assert!(set.insert(b));
/// assert!(set.insert(a));
/// assert!(!set.insert(b));
/// assert_eq!(set.values(), vec![b, a]);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdentitySet {
    members: Vec<ParticipantId>,
    #[serde(skip)]
    index: HashMap<ParticipantId, usize>,
}

impl IdentitySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` to the end of the set. Returns `false` if it was already present.
    pub fn insert(&mut self, id: ParticipantId) -> bool {
        self.ensure_index();
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id, self.members.len());
        self.members.push(id);
        true
    }

    /// Returns `true` if `id` is a member.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        if self.index.len() == self.members.len() {
            self.index.contains_key(id)
        } else {
            // Freshly deserialized; the index has not been rebuilt yet.
            self.members.contains(id)
        }
    }

    /// Removes `id`, keeping the remaining members in order.
    /// Returns `false` if it was not a member.
    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        self.ensure_index();
        let Some(position) = self.index.remove(id) else {
            return false;
        };
        self.members.remove(position);
        for shifted in &self.members[position..] {
            if let Some(slot) = self.index.get_mut(shifted) {
                *slot -= 1;
            }
        }
        true
    }

    /// Members in insertion order.
    pub fn values(&self) -> Vec<ParticipantId> {
        self.members.clone()
    }

    /// Iterates over members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantId> {
        self.members.iter()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn ensure_index(&mut self) {
        if self.index.len() != self.members.len() {
            self.index = self
                .members
                .iter()
                .enumerate()
                .map(|(position, id)| (*id, position))
                .collect();
        }
    }
}

impl PartialEq for IdentitySet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl Eq for IdentitySet {}

impl FromIterator<ParticipantId> for IdentitySet {
    fn from_iter<I: IntoIterator<Item = ParticipantId>>(iter: I) -> Self {
        let mut set = IdentitySet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
