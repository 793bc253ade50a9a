//! # Checked Arithmetic
//!
//! Every amount that touches a trustline (credit limits, balances, fees,
//! interest) goes through the helpers in this module. Wrapping arithmetic
//! and money do not mix: a wrapped balance is a silently corrupted ledger.
//!
//! The API is a small trait implemented for the integer widths the ledger
//! actually uses, plus a handful of checked conversions between the unsigned
//! limit domain (`u64`) and the signed balance domain (`i128`).
//!
//! ```
//! use trustline_protocol::math::{ArithmeticError, SafeMath};
//!
//! assert_eq!(40u64.safe_add(2), Ok(42));
//! assert_eq!(u64::MAX.safe_add(1), Err(ArithmeticError::Overflow));
//! assert_eq!(0u64.safe_sub(1), Err(ArithmeticError::Underflow));
//! ```

use thiserror::Error;

/// Failure of a checked integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    /// The mathematical result is above the type's maximum.
    #[error("arithmetic overflow")]
    Overflow,

    /// The mathematical result is below the type's minimum.
    #[error("arithmetic underflow")]
    Underflow,

    /// Division (or remainder) by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Checked arithmetic that reports the direction of a failure.
pub trait SafeMath: Sized + Copy {
    /// `self + rhs`, or an error if the result is not representable.
    fn safe_add(self, rhs: Self) -> Result<Self, ArithmeticError>;

    /// `self - rhs`, or an error if the result is not representable.
    fn safe_sub(self, rhs: Self) -> Result<Self, ArithmeticError>;

    /// `self * rhs`, or an error if the result is not representable.
    fn safe_mul(self, rhs: Self) -> Result<Self, ArithmeticError>;

    /// `self / rhs`, truncating toward zero.
    fn safe_div(self, rhs: Self) -> Result<Self, ArithmeticError>;
}

macro_rules! impl_safe_math_unsigned {
    ($($t:ty),*) => {
        $(
            impl SafeMath for $t {
                #[inline]
                fn safe_add(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    self.checked_add(rhs).ok_or(ArithmeticError::Overflow)
                }

                #[inline]
                fn safe_sub(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    self.checked_sub(rhs).ok_or(ArithmeticError::Underflow)
                }

                #[inline]
                fn safe_mul(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    self.checked_mul(rhs).ok_or(ArithmeticError::Overflow)
                }

                #[inline]
                fn safe_div(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    self.checked_div(rhs).ok_or(ArithmeticError::DivisionByZero)
                }
            }
        )*
    };
}

macro_rules! impl_safe_math_signed {
    ($($t:ty),*) => {
        $(
            impl SafeMath for $t {
                #[inline]
                fn safe_add(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    // Adding a negative can only fall off the bottom.
                    self.checked_add(rhs).ok_or(if rhs < 0 {
                        ArithmeticError::Underflow
                    } else {
                        ArithmeticError::Overflow
                    })
                }

                #[inline]
                fn safe_sub(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    self.checked_sub(rhs).ok_or(if rhs > 0 {
                        ArithmeticError::Underflow
                    } else {
                        ArithmeticError::Overflow
                    })
                }

                #[inline]
                fn safe_mul(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    self.checked_mul(rhs).ok_or(if (self < 0) != (rhs < 0) {
                        ArithmeticError::Underflow
                    } else {
                        ArithmeticError::Overflow
                    })
                }

                #[inline]
                fn safe_div(self, rhs: Self) -> Result<Self, ArithmeticError> {
                    if rhs == 0 {
                        return Err(ArithmeticError::DivisionByZero);
                    }
                    // MIN / -1 is the only other failure.
                    self.checked_div(rhs).ok_or(ArithmeticError::Overflow)
                }
            }
        )*
    };
}

impl_safe_math_unsigned!(u16, u32, u64, u128);
impl_safe_math_signed!(i64, i128);

/// Checked negation of a balance.
pub fn safe_neg(value: i128) -> Result<i128, ArithmeticError> {
    value.checked_neg().ok_or(ArithmeticError::Overflow)
}

/// Absolute value of a balance as an unsigned magnitude.
///
/// Unlike `i128::abs` this cannot overflow: `|i128::MIN|` fits in a `u128`.
pub fn abs_magnitude(value: i128) -> u128 {
    value.unsigned_abs()
}

/// Widens a credit limit into the balance domain.
///
/// Always succeeds; kept as a function so every crossing between the two
/// domains is greppable.
pub fn to_i128(value: u64) -> i128 {
    i128::from(value)
}

/// Narrows a non-negative balance magnitude back into the limit domain.
pub fn to_u64(value: i128) -> Result<u64, ArithmeticError> {
    if value < 0 {
        return Err(ArithmeticError::Underflow);
    }
    u64::try_from(value).map_err(|_| ArithmeticError::Overflow)
}

/// Converts an unsigned magnitude into a signed balance with the given sign.
pub fn signed_magnitude(magnitude: u128, negative: bool) -> Result<i128, ArithmeticError> {
    if negative {
        // i128::MIN has a magnitude one larger than i128::MAX.
        if magnitude == i128::MIN.unsigned_abs() {
            return Ok(i128::MIN);
        }
        let positive = i128::try_from(magnitude).map_err(|_| ArithmeticError::Underflow)?;
        Ok(-positive)
    } else {
        i128::try_from(magnitude).map_err(|_| ArithmeticError::Overflow)
    }
}
