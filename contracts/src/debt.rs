//! # Debts
//!
//! Obligations recorded next to the trustlines. A debtor acknowledges what
//! it owes a creditor; the creditor later pulls payment over a path with a
//! debit transfer, which reduces the debt by the amount that arrived.
//!
//! Debts of a pair are netted and antisymmetric: `debt(x, y) == -debt(y, x)`.
//! Like the fee ledger, changes are staged first and committed by a write
//! that cannot fail.

use std::collections::HashMap;

use trustline_protocol::identity::ParticipantId;
use trustline_protocol::math::{safe_neg, to_i128, SafeMath};

use crate::error::{LedgerError, LedgerResult};
use crate::trustline::TrustlineKey;

/// A debt change computed by [`DebtLedger::stage_increase`] or
/// [`DebtLedger::stage_decrease`], not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct StagedDebt {
    key: TrustlineKey,
    /// What `key.a()` owes `key.b()` afterwards.
    canonical: i128,
    /// The new debt from the debtor's side.
    pub debt: i128,
}

/// Net debts between participants.
#[derive(Debug, Default)]
pub struct DebtLedger {
    /// What `key.a()` owes `key.b()`. Zero entries are removed.
    debts: HashMap<TrustlineKey, i128>,
}

/// Flip `value` between canonical and `debtor`-side orientation.
fn oriented(key: &TrustlineKey, debtor: &ParticipantId, value: i128) -> LedgerResult<i128> {
    if key.a() == *debtor {
        Ok(value)
    } else {
        Ok(safe_neg(value)?)
    }
}

impl DebtLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// What `debtor` owes `creditor`; negative when the creditor is the one
    /// in debt.
    pub fn debt(&self, debtor: &ParticipantId, creditor: &ParticipantId) -> LedgerResult<i128> {
        let key = TrustlineKey::new(*debtor, *creditor)?;
        let canonical = self.debts.get(&key).copied().unwrap_or(0);
        oriented(&key, debtor, canonical)
    }

    /// Add `value` to what `debtor` owes `creditor`.
    pub fn stage_increase(
        &self,
        debtor: &ParticipantId,
        creditor: &ParticipantId,
        value: u64,
    ) -> LedgerResult<StagedDebt> {
        let debt = self.debt(debtor, creditor)?.safe_add(to_i128(value))?;
        self.staged(debtor, creditor, debt)
    }

    /// Take `value` off what `debtor` owes `creditor`. The debt cannot be
    /// paid down past zero.
    pub fn stage_decrease(
        &self,
        debtor: &ParticipantId,
        creditor: &ParticipantId,
        value: u64,
    ) -> LedgerResult<StagedDebt> {
        let current = self.debt(debtor, creditor)?;
        let value = to_i128(value);
        if value > current {
            return Err(LedgerError::DebitExceedsDebt {
                value,
                debt: current,
            });
        }
        let debt = current.safe_sub(value)?;
        self.staged(debtor, creditor, debt)
    }

    fn staged(
        &self,
        debtor: &ParticipantId,
        creditor: &ParticipantId,
        debt: i128,
    ) -> LedgerResult<StagedDebt> {
        let key = TrustlineKey::new(*debtor, *creditor)?;
        // Both sides of the pair must stay representable.
        let canonical = oriented(&key, debtor, debt)?;
        safe_neg(canonical)?;
        Ok(StagedDebt {
            key,
            canonical,
            debt,
        })
    }

    /// Apply a staged change.
    pub fn commit(&mut self, staged: StagedDebt) {
        if staged.canonical == 0 {
            self.debts.remove(&staged.key);
        } else {
            self.debts.insert(staged.key, staged.canonical);
        }
    }

    /// Number of pairs with an outstanding debt.
    pub fn len(&self) -> usize {
        self.debts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.debts.is_empty()
    }
}
