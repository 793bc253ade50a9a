//! # Trustline Ledger
//!
//! Ledger logic for a trustline-based currency network. Participants extend
//! credit to each other along bilateral trustlines; payments ripple through
//! chains of trustlines, moving each balance within its credit limits.
//!
//! - **Trustlines** ([`trustline`]) hold the bilateral credit limits, interest
//!   rates and balance, and the lifecycle state machine.
//! - **Interests** ([`interests`]) accrue lazily on debt, simple or
//!   continuously compounded.
//! - **Fees** ([`fees`], [`fee_ledger`]) are charged per hop and kept in a
//!   ledger of their own.
//! - **Debts** ([`debt`]) are acknowledged obligations outside the
//!   trustlines, paid down by debit transfers.
//! - **Onboarding** ([`onboarding`]) remembers who brought each user in.
//! - **Consent** ([`consent`]) gates changes that hurt a counterparty
//!   behind a recoverable secp256k1 signature.
//! - **The network** ([`currency_network`]) coordinates all of it and makes
//!   every multi-hop payment atomic.
//!
//! ## Design Principles
//!
//! 1. Every balance and limit computation is checked. Overflow is an error,
//!    never a wrap.
//! 2. State transitions are explicit: enum variants, not boolean flags.
//! 3. Changes are computed on copies and written back only once nothing
//!    can fail anymore.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod consent;
pub mod currency_network;
pub mod debt;
pub mod error;
pub mod events;
pub mod fee_ledger;
pub mod fees;
pub mod interests;
pub mod onboarding;
pub mod trustline;

pub use consent::{requires_counterparty_consent, Consent, ConsentAction, SignedConsent};
pub use currency_network::{CurrencyNetwork, FeePayer};
pub use debt::DebtLedger;
pub use error::{LedgerError, LedgerResult};
pub use events::{EventLog, NetworkEvent, RecordedEvent};
pub use fee_ledger::FeeLedger;
pub use onboarding::{Onboarder, OnboardingRegistry};
pub use trustline::{Trustline, TrustlineKey, TrustlineTerms};
