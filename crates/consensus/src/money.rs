//! Monetary units, money range rules, and exact-rational amounts.
//!
//! Output values are stored as signed 64-bit counts of base units, but all
//! fee, subsidy, and present-value arithmetic is carried out in exact
//! rationals so every node reaches bit-identical results.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Signed;

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;
pub const CENT: Amount = 1_000_000;

/// No amount larger than this (in base units) is valid.
pub const MAX_MONEY: Amount = 10_000_000_000_000_000;

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Lift an integer amount into the exact-rational domain.
pub fn rational(value: Amount) -> BigRational {
    BigRational::from_integer(BigInt::from(value))
}

pub fn max_money_rational() -> BigRational {
    rational(MAX_MONEY)
}

/// Money range check for rational intermediates.
pub fn rational_money_range(value: &BigRational) -> bool {
    !value.is_negative() && *value <= max_money_rational()
}

/// Render a rational amount as a decimal coin string, for log output.
pub fn format_money(value: &BigRational) -> String {
    let negative = value.is_negative();
    let base_units = value.abs().floor().to_integer();
    let (whole, frac) = num_integer::div_rem(base_units, BigInt::from(COIN));
    let frac = frac.to_u64_digits().1.first().copied().unwrap_or(0);
    let sign = if negative { "-" } else { "" };
    format!("{sign}{whole}.{frac:08}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
    }

    #[test]
    fn format_whole_and_fraction() {
        assert_eq!(format_money(&rational(COIN)), "1.00000000");
        assert_eq!(format_money(&rational(CENT)), "0.01000000");
        assert_eq!(format_money(&rational(-150_000_000)), "-1.50000000");
        let third = rational(COIN) / rational(3);
        assert_eq!(format_money(&third), "0.33333333");
    }

    #[test]
    fn rational_range_matches_integer_range() {
        assert!(rational_money_range(&rational(MAX_MONEY)));
        assert!(!rational_money_range(&(max_money_rational() + rational(1))));
        assert!(!rational_money_range(&rational(-1)));
    }
}
