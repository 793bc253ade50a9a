//! # Trustline
//!
//! The ledger primitive: two participants, two credit limits, one balance.
//!
//! A trustline is stored in canonical orientation, the participant with the
//! smaller address as `A`. Callers never need to care: every method takes
//! the acting participant and translates to and from their point of view.
//!
//! ```text
//!            creditline_ab (A trusts B)
//!      A  ───────────────────────────────▶  B
//!         ◀───────────────────────────────
//!            creditline_ba (B trusts A)
//!
//!   balance > 0 : B owes A     balance < 0 : A owes B
//!   invariant   : -creditline_ba <= balance <= creditline_ab
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!   Unestablished ──open/update──▶ Active ◀──unfreeze/freeze──▶ Frozen
//!         ▲                          │
//!         └──────────close───────────┘
//! ```
//!
//! Every mutating method works on a copy and writes it back only when the
//! whole transition succeeded. A failed call leaves the trustline exactly
//! as it was.

use std::fmt;

use serde::{Deserialize, Serialize};

use trustline_protocol::config::NetworkConfig;
use trustline_protocol::identity::ParticipantId;
use trustline_protocol::math::{abs_magnitude, safe_neg, to_i128, SafeMath};
use trustline_protocol::storage::{StoredTrustline, TrustlineRecord, TrustlineStatus};

use crate::consent::requires_counterparty_consent;
use crate::error::{LedgerError, LedgerResult};
use crate::interests::balance_with_interest;

// ---------------------------------------------------------------------------
// TrustlineKey
// ---------------------------------------------------------------------------

/// The unordered pair a trustline belongs to, stored with `a < b`.
///
/// The derived `Ord` is the canonical lock order for the whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrustlineKey {
    a: ParticipantId,
    b: ParticipantId,
}

impl TrustlineKey {
    /// Canonical key for the pair `{x, y}`.
    pub fn new(x: ParticipantId, y: ParticipantId) -> LedgerResult<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Ok(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Ok(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => Err(LedgerError::SelfTrustline(x)),
        }
    }

    pub fn a(&self) -> ParticipantId {
        self.a
    }

    pub fn b(&self) -> ParticipantId {
        self.b
    }

    /// Whether `p` is one of the two parties.
    pub fn involves(&self, p: &ParticipantId) -> bool {
        self.a == *p || self.b == *p
    }

    /// The party that is not `p`. Assumes `p` is a party.
    pub fn other(&self, p: &ParticipantId) -> ParticipantId {
        if self.a == *p {
            self.b
        } else {
            self.a
        }
    }
}

impl fmt::Display for TrustlineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.a, self.b)
    }
}

// ---------------------------------------------------------------------------
// TrustlineTerms
// ---------------------------------------------------------------------------

/// Credit limits and interest rates as seen by one party.
///
/// "Given" is what this party extends to the counterparty; "received" is
/// what the counterparty extends to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrustlineTerms {
    /// Most the counterparty may owe this party.
    pub creditline_given: u64,
    /// Most this party may owe the counterparty.
    pub creditline_received: u64,
    /// Rate (bps) this party charges on what the counterparty owes.
    pub interest_rate_given: u16,
    /// Rate (bps) the counterparty charges on what this party owes.
    pub interest_rate_received: u16,
}

impl TrustlineTerms {
    /// Terms with credit limits only, no interest.
    pub fn credit(creditline_given: u64, creditline_received: u64) -> Self {
        Self {
            creditline_given,
            creditline_received,
            ..Self::default()
        }
    }

    /// Same terms from the counterparty's side.
    pub fn mirrored(&self) -> Self {
        Self {
            creditline_given: self.creditline_received,
            creditline_received: self.creditline_given,
            interest_rate_given: self.interest_rate_received,
            interest_rate_received: self.interest_rate_given,
        }
    }
}

// ---------------------------------------------------------------------------
// Trustline
// ---------------------------------------------------------------------------

/// One trustline and its lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trustline {
    record: TrustlineRecord,
    status: TrustlineStatus,
}

impl Trustline {
    /// A zeroed, unestablished trustline for `key`.
    pub fn new(key: TrustlineKey) -> Self {
        Self {
            record: TrustlineRecord::empty(key.a, key.b),
            status: TrustlineStatus::Unestablished,
        }
    }

    /// Rebuild from storage. Rejects non-canonical pairs and balances that
    /// violate the credit limits.
    pub fn from_record(record: TrustlineRecord, status: TrustlineStatus) -> LedgerResult<Self> {
        let key = TrustlineKey::new(record.participant_a, record.participant_b)?;
        if key.a != record.participant_a {
            return Err(LedgerError::InvalidPath(format!(
                "record for {key} is not in canonical order"
            )));
        }
        let line = Self { record, status };
        line.check_bounds(record.balance)?;
        Ok(line)
    }

    pub fn key(&self) -> TrustlineKey {
        TrustlineKey {
            a: self.record.participant_a,
            b: self.record.participant_b,
        }
    }

    pub fn record(&self) -> &TrustlineRecord {
        &self.record
    }

    pub fn status(&self) -> TrustlineStatus {
        self.status
    }

    /// Record and status, ready for a store.
    pub fn stored(&self) -> StoredTrustline {
        StoredTrustline {
            record: self.record,
            status: self.status,
        }
    }

    fn is_a(&self, p: &ParticipantId) -> bool {
        self.record.participant_a == *p
    }

    /// Stored balance from `p`'s side: positive when the other party owes `p`.
    pub fn balance_for(&self, p: &ParticipantId) -> LedgerResult<i128> {
        if self.is_a(p) {
            Ok(self.record.balance)
        } else {
            Ok(safe_neg(self.record.balance)?)
        }
    }

    /// Current terms from `p`'s side.
    pub fn terms_for(&self, p: &ParticipantId) -> TrustlineTerms {
        let as_a = TrustlineTerms {
            creditline_given: self.record.creditline_ab,
            creditline_received: self.record.creditline_ba,
            interest_rate_given: self.record.interest_rate_ab,
            interest_rate_received: self.record.interest_rate_ba,
        };
        if self.is_a(p) {
            as_a
        } else {
            as_a.mirrored()
        }
    }

    /// Canonical balance after accruing interest up to `now`, without
    /// changing anything.
    pub fn balance_with_interest(&self, now: u64, config: &NetworkConfig) -> LedgerResult<i128> {
        let mut copy = *self;
        copy.accrue(now, config)?;
        Ok(copy.record.balance)
    }

    /// Fold pending interest into the balance and move the accrual
    /// timestamp to `now`. Returns the interest added (canonical sign).
    /// Does not check bounds; callers decide when the result must be valid.
    pub(crate) fn accrue(&mut self, now: u64, config: &NetworkConfig) -> LedgerResult<i128> {
        let accrual = balance_with_interest(
            self.record.balance,
            self.record.interest_rate_ab,
            self.record.interest_rate_ba,
            self.record.last_interest_timestamp,
            now,
            config.interests.model,
        )?;
        self.record.balance = accrual.balance;
        self.record.last_interest_timestamp = self.record.last_interest_timestamp.max(now);
        Ok(accrual.interest)
    }

    fn check_bounds(&self, balance: i128) -> LedgerResult<()> {
        let lower = safe_neg(to_i128(self.record.creditline_ba))?;
        let upper = to_i128(self.record.creditline_ab);
        if balance < lower || balance > upper {
            return Err(LedgerError::CreditLimitExceeded {
                attempted: balance,
                lower,
                upper,
            });
        }
        Ok(())
    }

    fn ensure_active(&self) -> LedgerResult<()> {
        match self.status {
            TrustlineStatus::Active => Ok(()),
            TrustlineStatus::Frozen => Err(LedgerError::TrustlineFrozen),
            TrustlineStatus::Unestablished => Err(LedgerError::TrustlineNotActive),
        }
    }

    fn validate_terms(terms: &TrustlineTerms, config: &NetworkConfig) -> LedgerResult<()> {
        for limit in [terms.creditline_given, terms.creditline_received] {
            if limit > config.max_credit_limit {
                return Err(LedgerError::CreditLimitTooHigh {
                    limit,
                    max: config.max_credit_limit,
                });
            }
        }
        let interests = &config.interests;
        for rate in [terms.interest_rate_given, terms.interest_rate_received] {
            if !interests.custom_interests && rate != interests.default_rate_bps {
                return Err(LedgerError::CustomInterestsDisabled {
                    default_rate: interests.default_rate_bps,
                });
            }
            if rate > interests.max_rate_bps {
                return Err(LedgerError::InterestRateTooHigh {
                    rate,
                    max: interests.max_rate_bps,
                });
            }
        }
        Ok(())
    }

    fn set_terms(&mut self, proposer: &ParticipantId, terms: &TrustlineTerms) {
        let canonical = if self.is_a(proposer) {
            *terms
        } else {
            terms.mirrored()
        };
        self.record.creditline_ab = canonical.creditline_given;
        self.record.creditline_ba = canonical.creditline_received;
        self.record.interest_rate_ab = canonical.interest_rate_given;
        self.record.interest_rate_ba = canonical.interest_rate_received;
    }

    // ---- Transitions ----

    /// Unestablished -> Active: `proposer` offers `creditline_given` at
    /// `interest_rate_given`. Unilateral, since nothing is owed yet and the
    /// counterparty only takes on debt by using the credit.
    ///
    /// When the network does not allow custom interests, the rate must be the
    /// default and both directions are set to it.
    pub fn open(
        &mut self,
        proposer: &ParticipantId,
        creditline_given: u64,
        interest_rate_given: u16,
        now: u64,
        config: &NetworkConfig,
    ) -> LedgerResult<()> {
        if self.status != TrustlineStatus::Unestablished {
            return Err(LedgerError::AlreadyEstablished {
                a: self.record.participant_a,
                b: self.record.participant_b,
            });
        }
        if creditline_given == 0 {
            return Err(LedgerError::ZeroCreditLimit);
        }
        let received_rate = if config.interests.custom_interests {
            0
        } else {
            config.interests.default_rate_bps
        };
        let terms = TrustlineTerms {
            creditline_given,
            creditline_received: 0,
            interest_rate_given,
            interest_rate_received: received_rate,
        };
        Self::validate_terms(&terms, config)?;

        let mut next = *self;
        next.set_terms(proposer, &terms);
        next.record.balance = 0;
        next.record.last_interest_timestamp = now;
        next.status = TrustlineStatus::Active;
        *self = next;
        Ok(())
    }

    /// Replace the terms of the line with `terms`, given from `proposer`'s
    /// side. `counterparty_consented` says whether a valid signed consent of
    /// the other party was presented.
    ///
    /// Pending interest is accrued at the old rates first. The new limits
    /// must still cover the balance that results.
    pub fn update_terms(
        &mut self,
        proposer: &ParticipantId,
        terms: &TrustlineTerms,
        counterparty_consented: bool,
        now: u64,
        config: &NetworkConfig,
    ) -> LedgerResult<()> {
        if self.status == TrustlineStatus::Frozen {
            return Err(LedgerError::TrustlineFrozen);
        }
        if self.status == TrustlineStatus::Unestablished
            && terms.creditline_given == 0
            && terms.creditline_received == 0
        {
            return Err(LedgerError::ZeroCreditLimit);
        }
        Self::validate_terms(terms, config)?;

        let current = self.terms_for(proposer);
        if !counterparty_consented && requires_counterparty_consent(&current, terms) {
            return Err(LedgerError::ConsentRequired {
                from: self.key().other(proposer),
            });
        }

        let mut next = *self;
        if next.status == TrustlineStatus::Unestablished {
            next.record.last_interest_timestamp = now;
        } else {
            next.accrue(now, config)?;
        }

        let owed = next.balance_for(proposer)?;
        if owed > 0 && abs_magnitude(owed) > u128::from(terms.creditline_given) {
            return Err(LedgerError::CreditLimitBelowBalance {
                limit: terms.creditline_given,
                outstanding: abs_magnitude(owed),
            });
        }
        if owed < 0 && abs_magnitude(owed) > u128::from(terms.creditline_received) {
            return Err(LedgerError::CreditLimitBelowBalance {
                limit: terms.creditline_received,
                outstanding: abs_magnitude(owed),
            });
        }

        next.set_terms(proposer, terms);
        next.status = TrustlineStatus::Active;
        *self = next;
        Ok(())
    }

    /// `payer` pays `amount` to the other party across this line.
    ///
    /// Accrues interest up to `now` first. Fails without any change if the
    /// line is not active or the resulting balance leaves the credit limits.
    pub fn apply_transfer(
        &mut self,
        payer: &ParticipantId,
        amount: u64,
        now: u64,
        config: &NetworkConfig,
    ) -> LedgerResult<()> {
        self.ensure_active()?;
        let mut next = *self;
        next.accrue(now, config)?;

        let delta = to_i128(amount);
        let balance = if next.is_a(payer) {
            next.record.balance.safe_sub(delta)?
        } else {
            next.record.balance.safe_add(delta)?
        };
        next.check_bounds(balance)?;
        next.record.balance = balance;
        *self = next;
        Ok(())
    }

    /// Fold accrued interest into the balance. Returns the interest added
    /// (canonical sign). Fails with `CreditLimitExceeded` if the interest
    /// would carry the balance past its limit.
    pub fn apply_interests(&mut self, now: u64, config: &NetworkConfig) -> LedgerResult<i128> {
        self.ensure_active()?;
        let mut next = *self;
        let interest = next.accrue(now, config)?;
        next.check_bounds(next.record.balance)?;
        *self = next;
        Ok(interest)
    }

    /// Active -> Frozen. The caller has established that both parties agree.
    pub fn freeze(&mut self) -> LedgerResult<()> {
        self.ensure_active()?;
        self.status = TrustlineStatus::Frozen;
        Ok(())
    }

    /// Frozen -> Active. The caller has established that both parties agree.
    pub fn unfreeze(&mut self) -> LedgerResult<()> {
        match self.status {
            TrustlineStatus::Frozen => {
                self.status = TrustlineStatus::Active;
                Ok(())
            }
            TrustlineStatus::Active => Err(LedgerError::TrustlineNotFrozen),
            TrustlineStatus::Unestablished => Err(LedgerError::TrustlineNotActive),
        }
    }

    /// Active -> Unestablished, resetting limits, rates and balance. Only
    /// allowed once the balance, including interest, is zero.
    pub fn close(&mut self, now: u64, config: &NetworkConfig) -> LedgerResult<()> {
        self.ensure_active()?;
        let balance = self.balance_with_interest(now, config)?;
        if balance != 0 {
            return Err(LedgerError::BalanceNotZero { balance });
        }
        let mut record = TrustlineRecord::empty(self.record.participant_a, self.record.participant_b);
        record.last_interest_timestamp = now.max(self.record.last_interest_timestamp);
        self.record = record;
        self.status = TrustlineStatus::Unestablished;
        Ok(())
    }
}
