//! # Network Configuration & Constants
//!
//! Every magic number in the ledger lives here, next to the runtime
//! [`NetworkConfig`] a currency network is created with.
//!
//! The constants are the ones you do not get to pick per network: address
//! width, the length of a year, what a basis point is. The config struct is
//! the part an operator does pick: the currency's name, how fees are charged,
//! how interest compounds, and when the network expires.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Identity & Signatures
// ---------------------------------------------------------------------------

/// Participant address length in bytes. The last 20 bytes of the Keccak-256
/// hash of an uncompressed secp256k1 public key.
pub const PARTICIPANT_ID_LENGTH: usize = 20;

/// Recoverable signature length: `r (32) || s (32) || v (1)`.
pub const RECOVERABLE_SIGNATURE_LENGTH: usize = 65;

/// Offset added to the raw recovery id in the Ethereum `v` convention.
pub const ETHEREUM_V_OFFSET: u8 = 27;

// ---------------------------------------------------------------------------
// Interest
// ---------------------------------------------------------------------------

/// 365 days. Leap years do not exist as far as interest is concerned.
pub const SECONDS_PER_YEAR: u64 = 60 * 60 * 24 * 365;

/// Interest rates are expressed in basis points: 1 bps = 0.01% per year.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Highest order of the Taylor expansion used for compound interest.
/// Later terms are zero for any realistic rate and elapsed time.
pub const TAYLOR_ORDERS: u32 = 15;

/// How far the clock may appear to run backwards (seconds) before interest
/// computation refuses to continue. Within the window, elapsed time is zero.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

/// Ceiling for any single interest rate, in basis points (20% a year).
pub const DEFAULT_MAX_INTEREST_RATE_BPS: u16 = 2_000;

// ---------------------------------------------------------------------------
// Paths & Limits
// ---------------------------------------------------------------------------

/// Default maximum number of hops a payment path may have.
pub const DEFAULT_MAX_HOPS: usize = 8;

/// Default ceiling for a single credit limit.
pub const DEFAULT_MAX_CREDIT_LIMIT: u64 = u64::MAX;

/// Default decimals of the network currency.
pub const DEFAULT_DECIMALS: u8 = 2;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Which amount a hop's fee is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeBasis {
    /// The full amount moved across the hop.
    #[default]
    ForwardedAmount,
    /// Only the part of the movement that increases the hop creditor's
    /// exposure. Paying back existing debt is free.
    ImbalanceGenerated,
}

/// Per-hop fee schedule.
///
/// The fee for a hop moving `x` (per [`FeeBasis`]) is
/// `flat_per_hop + x / capacity_imbalance_divisor + 1`, the divisor part
/// only applying when the divisor is nonzero, and never more than `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    /// Fixed fee charged on every hop that moves a nonzero amount.
    pub flat_per_hop: u64,
    /// Proportional fee divisor; `0` disables the proportional part.
    pub capacity_imbalance_divisor: u64,
    /// Which amount the fee is computed from.
    pub basis: FeeBasis,
}

impl FeePolicy {
    /// No fees at all.
    pub const FREE: FeePolicy = FeePolicy {
        flat_per_hop: 0,
        capacity_imbalance_divisor: 0,
        basis: FeeBasis::ForwardedAmount,
    };

    /// A flat fee per hop, nothing proportional.
    pub fn flat(per_hop: u64) -> Self {
        Self {
            flat_per_hop: per_hop,
            ..Self::FREE
        }
    }

    /// The capacity imbalance fee: `imbalance / divisor + 1` per hop.
    pub fn imbalance(divisor: u64) -> Self {
        Self {
            flat_per_hop: 0,
            capacity_imbalance_divisor: divisor,
            basis: FeeBasis::ImbalanceGenerated,
        }
    }
}

/// How outstanding balances grow over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestModel {
    /// `balance * rate * t / (year * 10_000)`.
    Simple,
    /// Continuous compounding approximated by a truncated Taylor series.
    #[default]
    Compound,
}

/// Interest rules of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestPolicy {
    pub model: InterestModel,
    /// Rate (bps) every trustline uses when custom interests are disabled.
    pub default_rate_bps: u16,
    /// Whether participants may negotiate their own rates.
    pub custom_interests: bool,
    /// Upper bound for any negotiated rate.
    pub max_rate_bps: u16,
}

impl Default for InterestPolicy {
    fn default() -> Self {
        Self {
            model: InterestModel::Compound,
            default_rate_bps: 0,
            custom_interests: true,
            max_rate_bps: DEFAULT_MAX_INTEREST_RATE_BPS,
        }
    }
}

// ---------------------------------------------------------------------------
// Network configuration
// ---------------------------------------------------------------------------

/// Errors loading or validating a [`NetworkConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for a `NetworkConfig`.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The values parse but do not make sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything that distinguishes one currency network from another.
///
/// Missing JSON fields take their defaults, so the smallest valid file is
/// `{"name": "Euro", "symbol": "EUR"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub fees: FeePolicy,
    pub interests: InterestPolicy,
    /// Longest allowed payment path, counted in hops.
    pub max_hops: usize,
    /// Largest credit limit anyone may extend.
    pub max_credit_limit: u64,
    /// Unix time after which the network may be frozen for good.
    /// `None` means the network never expires.
    pub expiration_time: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "Trustline Dollar".to_string(),
            symbol: "TLD".to_string(),
            decimals: DEFAULT_DECIMALS,
            fees: FeePolicy::FREE,
            interests: InterestPolicy::default(),
            max_hops: DEFAULT_MAX_HOPS,
            max_credit_limit: DEFAULT_MAX_CREDIT_LIMIT,
            expiration_time: None,
        }
    }
}

impl NetworkConfig {
    /// Load and validate a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: NetworkConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no network can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".into()));
        }
        if self.max_hops == 0 {
            return Err(ConfigError::Invalid("max_hops must be at least 1".into()));
        }
        if self.max_credit_limit == 0 {
            return Err(ConfigError::Invalid(
                "max_credit_limit must be positive".into(),
            ));
        }
        let interests = &self.interests;
        if interests.default_rate_bps > interests.max_rate_bps {
            return Err(ConfigError::Invalid(format!(
                "default interest rate {} bps exceeds maximum {} bps",
                interests.default_rate_bps, interests.max_rate_bps
            )));
        }
        Ok(())
    }
}
