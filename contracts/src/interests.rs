//! # Interest Accrual
//!
//! Debt on a trustline grows over time at the rate its creditor charges.
//! Accrual is lazy: nothing ticks in the background. Whenever a trustline
//! is touched, the interest since `last_interest_timestamp` is computed and
//! folded into the balance.
//!
//! ## Models
//!
//! Rates are annual, in basis points. With `r` the rate, `t` the elapsed
//! seconds and `Y = 31_536_000`:
//!
//! - **Simple**: `|b| * r * t / (Y * 10_000)`.
//! - **Compound** (default): continuous compounding, `|b| * (e^x - 1)` with
//!   `x = r * t / (Y * 10_000)`, evaluated as a Taylor series. Each term is
//!   derived from the previous one as `term_k = term_{k-1} * r * t /
//!   (Y * 10_000 * k)` and truncated to an integer before the next step.
//!   The series stops at the first zero term or after 15 orders.
//!
//! Interest is computed on the magnitude of the balance and carries its
//! sign, so a debt grows in whichever direction it is owed. Every division
//! truncates toward zero; the ledger never holds fractional units.

use trustline_protocol::config::{
    InterestModel, BPS_DENOMINATOR, MAX_CLOCK_SKEW_SECS, SECONDS_PER_YEAR, TAYLOR_ORDERS,
};
use trustline_protocol::math::{abs_magnitude, signed_magnitude, ArithmeticError, SafeMath};

use crate::error::{LedgerError, LedgerResult};

/// Outcome of one accrual step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    /// Balance after interest.
    pub balance: i128,
    /// Interest added, with the balance's sign.
    pub interest: i128,
}

impl Accrual {
    fn unchanged(balance: i128) -> Self {
        Self {
            balance,
            interest: 0,
        }
    }
}

/// Accrue interest on `balance` at `rate_bps` for `elapsed_seconds`.
///
/// Zero balance, rate or elapsed time returns the balance unchanged with
/// zero interest.
///
/// ```
/// use trustline_contracts::interests::accrue;
/// use trustline_protocol::config::InterestModel;
///
/// // 10% a year on 1_000_000 for one year, simple interest.
/// let a = accrue(1_000_000, 1_000, 31_536_000, InterestModel::Simple).unwrap();
/// assert_eq!(a.interest, 100_000);
///
/// // Debt owed the other way grows the other way.
/// let a = accrue(-1_000_000, 1_000, 31_536_000, InterestModel::Simple).unwrap();
/// assert_eq!(a.balance, -1_100_000);
/// ```
pub fn accrue(
    balance: i128,
    rate_bps: u16,
    elapsed_seconds: u64,
    model: InterestModel,
) -> Result<Accrual, ArithmeticError> {
    if balance == 0 || rate_bps == 0 || elapsed_seconds == 0 {
        return Ok(Accrual::unchanged(balance));
    }

    let magnitude = abs_magnitude(balance);
    let interest = match model {
        InterestModel::Simple => simple_interest(magnitude, rate_bps, elapsed_seconds)?,
        InterestModel::Compound => compound_interest(magnitude, rate_bps, elapsed_seconds)?,
    };
    if interest == 0 {
        return Ok(Accrual::unchanged(balance));
    }

    let interest = signed_magnitude(interest, balance < 0)?;
    Ok(Accrual {
        balance: balance.safe_add(interest)?,
        interest,
    })
}

fn year_denominator() -> Result<u128, ArithmeticError> {
    u128::from(SECONDS_PER_YEAR).safe_mul(u128::from(BPS_DENOMINATOR))
}

fn simple_interest(magnitude: u128, rate_bps: u16, elapsed: u64) -> Result<u128, ArithmeticError> {
    magnitude
        .safe_mul(u128::from(rate_bps))?
        .safe_mul(u128::from(elapsed))?
        .safe_div(year_denominator()?)
}

fn compound_interest(
    magnitude: u128,
    rate_bps: u16,
    elapsed: u64,
) -> Result<u128, ArithmeticError> {
    let growth = u128::from(rate_bps).safe_mul(u128::from(elapsed))?;
    let denominator = year_denominator()?;

    let mut term = magnitude;
    let mut interest: u128 = 0;
    for order in 1..=TAYLOR_ORDERS {
        term = term
            .safe_mul(growth)?
            .safe_div(denominator.safe_mul(u128::from(order))?)?;
        if term == 0 {
            break;
        }
        interest = interest.safe_add(term)?;
    }
    Ok(interest)
}

/// Seconds between the last accrual and `now`.
///
/// A clock up to [`MAX_CLOCK_SKEW_SECS`] behind `last` counts as no time
/// passing. Further back is an error rather than negative interest.
pub fn elapsed_since(last: u64, now: u64) -> LedgerResult<u64> {
    if now >= last {
        return Ok(now - last);
    }
    if last - now <= MAX_CLOCK_SKEW_SECS {
        Ok(0)
    } else {
        Err(LedgerError::ClockWentBackwards { last, now })
    }
}

/// Balance of a trustline after accruing from `last` to `now`, picking the
/// rate of whichever side is owed: `rate_ab` on positive balances,
/// `rate_ba` on negative ones.
pub fn balance_with_interest(
    balance: i128,
    rate_ab: u16,
    rate_ba: u16,
    last: u64,
    now: u64,
    model: InterestModel,
) -> LedgerResult<Accrual> {
    let elapsed = elapsed_since(last, now)?;
    let rate = if balance > 0 { rate_ab } else { rate_ba };
    Ok(accrue(balance, rate, elapsed, model)?)
}
