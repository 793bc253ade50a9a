//! # Ledger Errors
//!
//! One error type for every rejection the ledger can produce. Each variant
//! is a reason the requested change did not happen; none of them leave
//! partial state behind.
//!
//! Failures inside a multi-hop payment are wrapped in [`LedgerError::Hop`]
//! so callers learn which hop and which trustline refused. [`LedgerError::root`]
//! strips the wrapping when only the reason matters.

use thiserror::Error;

use trustline_protocol::crypto::SignatureError;
use trustline_protocol::identity::ParticipantId;
use trustline_protocol::math::ArithmeticError;
use trustline_protocol::storage::StorageError;

/// Errors returned by trustline and currency network operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// A balance, fee, interest or limit computation left the integer range.
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    /// A consent signature was malformed or did not recover a key.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A consent was signed by someone other than the party who must agree.
    #[error("unauthorized signer: expected {expected}, recovered {recovered}")]
    UnauthorizedSigner {
        expected: ParticipantId,
        recovered: ParticipantId,
    },

    /// The signed consent does not describe the operation being submitted.
    #[error("consent does not match the request: {0}")]
    ConsentMismatch(String),

    /// The change needs the counterparty's signed consent and none was given.
    #[error("consent of {from} is required for this change")]
    ConsentRequired { from: ParticipantId },

    /// The consent nonce is stale or from the future.
    #[error("invalid nonce for {signer}: expected {expected}, got {got}")]
    InvalidNonce {
        signer: ParticipantId,
        expected: u64,
        got: u64,
    },

    /// The signer used up every nonce and cannot consent to anything more.
    #[error("nonces of {signer} are exhausted")]
    NonceExhausted { signer: ParticipantId },

    /// A debit transfer pulls more than the debtor owes.
    #[error("debit of {value} exceeds the outstanding debt {debt}")]
    DebitExceedsDebt { value: i128, debt: i128 },

    /// The resulting balance would leave `[-creditline_ba, creditline_ab]`.
    #[error("credit limit exceeded: balance would be {attempted}, allowed [{lower}, {upper}]")]
    CreditLimitExceeded {
        attempted: i128,
        lower: i128,
        upper: i128,
    },

    /// A credit limit may not be lowered under the debt it currently covers.
    #[error("credit limit {limit} is below the outstanding balance {outstanding}")]
    CreditLimitBelowBalance { limit: u64, outstanding: u128 },

    /// The credit limit is larger than the network allows.
    #[error("credit limit {limit} exceeds network maximum {max}")]
    CreditLimitTooHigh { limit: u64, max: u64 },

    /// Opening a trustline requires offering some credit.
    #[error("a trustline cannot be established with zero credit limits")]
    ZeroCreditLimit,

    /// The interest rate is larger than the network allows.
    #[error("interest rate {rate} bps exceeds network maximum {max} bps")]
    InterestRateTooHigh { rate: u16, max: u16 },

    /// This network only allows its default interest rate.
    #[error("custom interest rates are disabled; rates must be {default_rate} bps")]
    CustomInterestsDisabled { default_rate: u16 },

    /// Both parties froze the trustline.
    #[error("trustline is frozen")]
    TrustlineFrozen,

    /// Unfreezing a trustline that is not frozen.
    #[error("trustline is not frozen")]
    TrustlineNotFrozen,

    /// The trustline exists but nobody has extended credit on it.
    #[error("trustline is not active")]
    TrustlineNotActive,

    /// The trustline was already opened.
    #[error("trustline between {a} and {b} is already established")]
    AlreadyEstablished { a: ParticipantId, b: ParticipantId },

    /// No trustline has ever been registered for the pair.
    #[error("no trustline between {a} and {b}")]
    TrustlineNotFound { a: ParticipantId, b: ParticipantId },

    /// A participant cannot hold a trustline with themselves.
    #[error("participant {0} cannot have a trustline with itself")]
    SelfTrustline(ParticipantId),

    /// Closing requires a zero balance including accrued interest.
    #[error("trustline balance is {balance}, must be zero to close")]
    BalanceNotZero { balance: i128 },

    /// The path is too short, too long, or steps from a participant to itself.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Transfers must move a positive amount.
    #[error("transfer amount must be positive")]
    InvalidAmount,

    /// The fees the path would charge exceed what the payer allowed.
    #[error("fee {fee} exceeds the limit {max_fee}")]
    FeeExceedsLimit { fee: u64, max_fee: u64 },

    /// The clock is further behind the last accrual than skew allows.
    #[error("clock went backwards: last accrual at {last}, now {now}")]
    ClockWentBackwards { last: u64, now: u64 },

    /// The network was frozen after expiring; nothing moves anymore.
    #[error("currency network is frozen")]
    NetworkFrozen,

    /// Freezing the network before its expiration time.
    #[error("network cannot be frozen before its expiration time ({expiration_time:?}), now {now}")]
    NetworkNotExpired {
        expiration_time: Option<u64>,
        now: u64,
    },

    /// The configuration handed to the network is unusable.
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),

    /// A trustline store failed while saving or loading the network.
    #[error("storage error: {0}")]
    Storage(String),

    /// A failure at one hop of a payment path.
    #[error("hop {hop} ({from} -> {to}) failed: {source}")]
    Hop {
        /// Zero-based index of the hop within the path.
        hop: usize,
        from: ParticipantId,
        to: ParticipantId,
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// The underlying reason, with any hop wrapping removed.
    pub fn root(&self) -> &LedgerError {
        match self {
            LedgerError::Hop { source, .. } => source.root(),
            other => other,
        }
    }

    /// Index of the failing hop, if this failure happened on a payment path.
    pub fn hop(&self) -> Option<usize> {
        match self {
            LedgerError::Hop { hop, .. } => Some(*hop),
            _ => None,
        }
    }

    pub(crate) fn at_hop(self, hop: usize, from: ParticipantId, to: ParticipantId) -> Self {
        LedgerError::Hop {
            hop,
            from,
            to,
            source: Box::new(self),
        }
    }
}

impl From<SignatureError> for LedgerError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidSignature(reason) => LedgerError::InvalidSignature(reason),
            SignatureError::UnauthorizedSigner {
                expected,
                recovered,
            } => LedgerError::UnauthorizedSigner {
                expected,
                recovered,
            },
        }
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

/// Convenience alias for ledger results.
pub type LedgerResult<T> = Result<T, LedgerError>;
