//! Fixed-point helpers
//!
//! Every quantity and turnover computed by the engine goes through these
//! helpers so that results are truncated at `SCALE` fractional digits and
//! reconcile exactly against the funds frozen by the ledger. Sums and products
//! are checked: an overflow is an error, never a panic.

use crate::error::EngineError;
use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits kept for amounts, prices and turnover
pub const SCALE: u32 = 8;

/// Truncates `value` to `SCALE` fractional digits (toward zero)
pub fn floor(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::ToZero)
}

pub fn add_floor(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    a.checked_add(b).map(floor).ok_or(EngineError::Overflow)
}

/// Operands are non-negative amounts, so the difference never saturates
pub fn sub_floor(a: Decimal, b: Decimal) -> Decimal {
    floor(a.saturating_sub(b))
}

pub fn mul_floor(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    a.checked_mul(b).map(floor).ok_or(EngineError::Overflow)
}

/// Division by zero yields zero: a zero price can never buy anything.
pub fn div_floor(a: Decimal, b: Decimal) -> Decimal {
    a.checked_div(b).map(floor).unwrap_or(Decimal::ZERO)
}

/// Depth aggregates clamp at the representable maximum
pub fn saturating_add_floor(a: Decimal, b: Decimal) -> Decimal {
    floor(a.saturating_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_truncates_extra_digits() {
        assert_eq!(floor(dec!(1.123456789)), dec!(1.12345678));
        assert_eq!(floor(dec!(-1.123456789)), dec!(-1.12345678));
        assert_eq!(floor(dec!(2)), dec!(2));
    }

    #[test]
    fn test_mul_and_div_never_round_up() {
        assert_eq!(mul_floor(dec!(0.33333333), dec!(3)), Ok(dec!(0.99999999)));
        assert_eq!(div_floor(dec!(50), dec!(30)), dec!(1.66666666));
        assert_eq!(div_floor(dec!(2), dec!(3)), dec!(0.66666666));
    }

    #[test]
    fn test_div_by_zero_is_zero() {
        assert_eq!(div_floor(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_add_sub() {
        assert_eq!(add_floor(dec!(0.1), dec!(0.2)), Ok(dec!(0.3)));
        assert_eq!(sub_floor(dec!(1.0), dec!(0.4)), dec!(0.6));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let big = Decimal::from_i128_with_scale(100_000_000_000_000, 0);
        let price = Decimal::from_i128_with_scale(1_000_000_000_000_000, 0);
        assert_eq!(mul_floor(price, big), Err(EngineError::Overflow));
        assert_eq!(add_floor(Decimal::MAX, dec!(1)), Err(EngineError::Overflow));
        assert_eq!(saturating_add_floor(Decimal::MAX, dec!(1)), Decimal::MAX);
    }
}
