//! # Fee Ledger
//!
//! Trustline balances move by the amount paid. Fees are kept apart: each hop
//! fee debits the fee payer and credits the hop's creditor, the participant
//! who receives on that hop and whose extended credit the payment consumes.
//! Every posting is balanced, so the ledger always sums to zero.
//!
//! Posting is split in two. [`FeeLedger::stage`] does all the arithmetic and
//! can fail; [`FeeLedger::commit`] only writes the staged results and cannot.
//! A transfer stages while it can still abort and commits together with its
//! trustlines.

use std::collections::HashMap;

use trustline_protocol::identity::ParticipantId;
use trustline_protocol::math::{to_i128, ArithmeticError, SafeMath};

/// One hop fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePosting {
    pub payer: ParticipantId,
    pub creditor: ParticipantId,
    pub fee: u64,
}

/// New balances computed by [`FeeLedger::stage`], not yet applied.
#[derive(Debug, Default)]
#[must_use]
pub struct StagedFees {
    balances: Vec<(ParticipantId, i128)>,
}

/// Net fee position of every participant.
#[derive(Debug, Default)]
pub struct FeeLedger {
    balances: HashMap<ParticipantId, i128>,
}

impl FeeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Net fees of `p`: positive when `p` earned more than it paid.
    pub fn balance(&self, p: &ParticipantId) -> i128 {
        self.balances.get(p).copied().unwrap_or(0)
    }

    /// Sum over all participants. Zero unless something is badly wrong.
    pub fn total(&self) -> i128 {
        self.balances.values().sum()
    }

    /// Compute the balances after `postings` without applying them.
    pub fn stage(&self, postings: &[FeePosting]) -> Result<StagedFees, ArithmeticError> {
        let mut next: HashMap<ParticipantId, i128> = HashMap::new();
        for posting in postings {
            let fee = to_i128(posting.fee);
            let payer = *next
                .entry(posting.payer)
                .or_insert_with(|| self.balance(&posting.payer));
            next.insert(posting.payer, payer.safe_sub(fee)?);
            let creditor = *next
                .entry(posting.creditor)
                .or_insert_with(|| self.balance(&posting.creditor));
            next.insert(posting.creditor, creditor.safe_add(fee)?);
        }
        Ok(StagedFees {
            balances: next.into_iter().collect(),
        })
    }

    /// Apply staged balances.
    pub fn commit(&mut self, staged: StagedFees) {
        for (participant, balance) in staged.balances {
            self.balances.insert(participant, balance);
        }
    }
}
