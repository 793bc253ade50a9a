//! # Fee Calculation
//!
//! A payment that crosses a hop uses up credit someone extended. The fee is
//! what that costs. It is computed per hop from the network's [`FeePolicy`]:
//!
//! ```text
//! fee = min(flat_per_hop + x / capacity_imbalance_divisor + 1, x)
//! ```
//!
//! where the divisor part only applies when the divisor is nonzero, and
//! `x` is either the forwarded amount or the imbalance the hop generates
//! (see [`FeeBasis`]). Moving nothing costs nothing, and a hop never costs
//! more than it moves.

use trustline_protocol::config::{FeeBasis, FeePolicy};
use trustline_protocol::math::{to_i128, to_u64, ArithmeticError, SafeMath};

/// Fee for moving `amount` across one hop under `policy`.
///
/// ```
/// use trustline_contracts::fees::compute_fee;
/// use trustline_protocol::config::FeePolicy;
///
/// assert_eq!(compute_fee(30, &FeePolicy::flat(1)).unwrap(), 1);
/// assert_eq!(compute_fee(1_000, &FeePolicy::imbalance(100)).unwrap(), 11);
/// assert_eq!(compute_fee(0, &FeePolicy::flat(5)).unwrap(), 0);
/// ```
pub fn compute_fee(amount: u64, policy: &FeePolicy) -> Result<u64, ArithmeticError> {
    if amount == 0 {
        return Ok(0);
    }
    // Anything above u64::MAX is capped at `amount` anyway.
    let proportional = if policy.capacity_imbalance_divisor > 0 {
        match amount.safe_div(policy.capacity_imbalance_divisor)?.safe_add(1) {
            Ok(part) => part,
            Err(ArithmeticError::Overflow) => return Ok(amount),
            Err(err) => return Err(err),
        }
    } else {
        0
    };
    match policy.flat_per_hop.safe_add(proportional) {
        Ok(raw) => Ok(raw.min(amount)),
        Err(ArithmeticError::Overflow) => Ok(amount),
        Err(err) => Err(err),
    }
}

/// The part of a payment of `amount` that pushes the payer into (further)
/// debt with the receiver of the hop.
///
/// `payer_balance` is the hop's balance from the payer's side: positive when
/// the receiver owes the payer. Paying down what the receiver owes is free
/// of imbalance; only the remainder counts.
pub fn imbalance_generated(payer_balance: i128, amount: u64) -> Result<u64, ArithmeticError> {
    if payer_balance <= 0 {
        return Ok(amount);
    }
    if payer_balance >= to_i128(amount) {
        return Ok(0);
    }
    amount.safe_sub(to_u64(payer_balance)?)
}

/// The amount the fee of one hop is computed from.
pub fn fee_input(
    policy: &FeePolicy,
    payer_balance: i128,
    amount: u64,
) -> Result<u64, ArithmeticError> {
    match policy.basis {
        FeeBasis::ForwardedAmount => Ok(amount),
        FeeBasis::ImbalanceGenerated => imbalance_generated(payer_balance, amount),
    }
}

/// Fee for one hop, given the payer's balance on it before the payment.
pub fn hop_fee(
    policy: &FeePolicy,
    payer_balance: i128,
    amount: u64,
) -> Result<u64, ArithmeticError> {
    compute_fee(fee_input(policy, payer_balance, amount)?, policy)
}
