//! # Network Events
//!
//! An append-only log of everything the network committed. Failed requests
//! leave no trace here; every entry corresponds to a state change that
//! happened. Entries carry a sequence number and the time of the change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trustline_protocol::identity::ParticipantId;

use crate::onboarding::Onboarder;
use crate::trustline::TrustlineTerms;

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    TrustlineOpened {
        proposer: ParticipantId,
        counterparty: ParticipantId,
        creditline_given: u64,
        interest_rate_given: u16,
    },
    TrustlineUpdated {
        proposer: ParticipantId,
        counterparty: ParticipantId,
        /// New terms from the proposer's side.
        terms: TrustlineTerms,
    },
    TrustlineFrozen {
        proposer: ParticipantId,
        counterparty: ParticipantId,
    },
    TrustlineUnfrozen {
        proposer: ParticipantId,
        counterparty: ParticipantId,
    },
    TrustlineClosed {
        a: ParticipantId,
        b: ParticipantId,
    },
    /// A payment went through. `fee_payer` paid `fee` in total.
    Transfer {
        id: Uuid,
        path: Vec<ParticipantId>,
        amount: u64,
        fee: u64,
        fee_payer: ParticipantId,
    },
    /// Balance of the canonical pair after a change, `a`'s side.
    BalanceUpdated {
        a: ParticipantId,
        b: ParticipantId,
        balance: i128,
    },
    InterestApplied {
        a: ParticipantId,
        b: ParticipantId,
        interest: i128,
    },
    /// What `debtor` owes `creditor` after an increase or a debit transfer.
    DebtUpdated {
        debtor: ParticipantId,
        creditor: ParticipantId,
        debt: i128,
    },
    /// `onboardee` joined the network with its first trustline.
    Onboarded {
        onboardee: ParticipantId,
        onboarder: Onboarder,
    },
    NetworkFrozen,
}

/// A logged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub sequence: u64,
    pub timestamp: u64,
    pub event: NetworkEvent,
}

/// Append-only event storage.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<RecordedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event`, numbering it after the last entry.
    pub fn append(&mut self, timestamp: u64, event: NetworkEvent) {
        let sequence = self.entries.len() as u64;
        self.entries.push(RecordedEvent {
            sequence,
            timestamp,
            event,
        });
    }

    pub fn entries(&self) -> &[RecordedEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
