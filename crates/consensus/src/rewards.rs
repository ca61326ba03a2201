//! Demurrage arithmetic, block subsidy schedule, and budget application.
//!
//! Every amount leaving this module is an exact `BigRational`. The only
//! rounding anywhere is inside the fixed-precision power used for the
//! demurrage adjustment, matching the legacy daemon's 113-bit floating
//! interim: the power is computed on a 128-bit mantissa with
//! round-to-nearest at each step and then widened back into an exact
//! rational, so all nodes agree on every bit of the result.

use std::collections::BTreeMap;

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};

use crate::money::{max_money_rational, rational, Amount};
use crate::params::ConsensusParams;

const MANTISSA_BITS: u64 = 128;

/// Floating-point value `mantissa * 2^exponent` with a fixed-width mantissa.
struct Fixed {
    mantissa: BigUint,
    exponent: i64,
}

impl Fixed {
    fn one() -> Self {
        normalize(BigUint::one(), 0)
    }

    fn into_rational(self) -> BigRational {
        if self.exponent >= 0 {
            BigRational::from_integer(BigInt::from(self.mantissa << self.exponent as u64))
        } else {
            BigRational::new(
                BigInt::from(self.mantissa),
                BigInt::from(BigUint::one() << (-self.exponent) as u64),
            )
        }
    }
}

fn normalize(mut mantissa: BigUint, mut exponent: i64) -> Fixed {
    debug_assert!(!mantissa.is_zero());
    let bits = mantissa.bits();
    if bits > MANTISSA_BITS {
        let shift = bits - MANTISSA_BITS;
        let half = BigUint::one() << (shift - 1);
        let dropped = &mantissa & ((BigUint::one() << shift) - BigUint::one());
        mantissa >>= shift;
        exponent += shift as i64;
        if dropped >= half {
            mantissa += BigUint::one();
            if mantissa.bits() > MANTISSA_BITS {
                mantissa >>= 1;
                exponent += 1;
            }
        }
    } else if bits < MANTISSA_BITS {
        let shift = MANTISSA_BITS - bits;
        mantissa <<= shift;
        exponent -= shift as i64;
    }
    Fixed { mantissa, exponent }
}

fn fixed_mul(a: &Fixed, b: &Fixed) -> Fixed {
    normalize(&a.mantissa * &b.mantissa, a.exponent + b.exponent)
}

/// `(num/den)^exp` on the fixed-width mantissa, by binary exponentiation.
fn fixed_pow(num: u64, den: u64, exp: u64) -> Fixed {
    let scaled = BigUint::from(num) << (2 * MANTISSA_BITS);
    let mut base = normalize(scaled / BigUint::from(den), -(2 * MANTISSA_BITS as i64));
    let mut result = Fixed::one();
    let mut remaining = exp;
    while remaining > 0 {
        if remaining & 1 == 1 {
            result = fixed_mul(&result, &base);
        }
        remaining >>= 1;
        if remaining > 0 {
            base = fixed_mul(&base, &base);
        }
    }
    result
}

/// Present value of `initial` after `relative_depth` blocks of demurrage.
///
/// Depth zero returns the value untouched; negative depth values a claim
/// stated in the future and yields a result larger than the input.
pub fn time_adjusted_value(
    initial: &BigRational,
    relative_depth: i64,
    demurrage_rate: i64,
) -> BigRational {
    if relative_depth == 0 {
        return initial.clone();
    }
    let rate = demurrage_rate as u64;
    let adjustment = if relative_depth > 0 {
        fixed_pow(rate - 1, rate, relative_depth as u64)
    } else {
        fixed_pow(rate, rate - 1, relative_depth.unsigned_abs())
    };
    adjustment.into_rational() * initial
}

/// Initial-distribution amount at a height: a linear ramp from
/// `tithe + initial_subsidy` at height zero down to `tithe` just before
/// `eq_height`, then zero.
pub fn initial_distribution_amount(height: i32, params: &ConsensusParams) -> BigRational {
    if height >= params.eq_height {
        return BigRational::zero();
    }
    let remaining = rational((params.eq_height - height) as Amount);
    rational(params.tithe_amount)
        + remaining * rational(params.initial_subsidy) / rational(params.eq_height as Amount)
}

/// The perpetual subsidy exactly offsets aggregate demurrage at the money
/// supply cap.
pub fn perpetual_subsidy_amount(params: &ConsensusParams) -> BigRational {
    max_money_rational() / rational(params.demurrage_rate)
}

/// Upper bound on what a coinbase may claim at a height, in present value.
pub fn block_value(height: i32, fees: &BigRational, params: &ConsensusParams) -> BigRational {
    initial_distribution_amount(height, params) + perpetual_subsidy_amount(params) + fees
}

#[derive(Clone, Debug)]
pub struct BudgetEntry<D> {
    pub weight: u64,
    pub destination: D,
}

/// A mandated split of a block-reward component: `ratio` of the amount is
/// owed, divided over `entries` by weight.
#[derive(Clone, Debug)]
pub struct Budget<D> {
    pub ratio: BigRational,
    pub entries: Vec<BudgetEntry<D>>,
}

impl<D> Budget<D> {
    pub fn empty() -> Self {
        Self {
            ratio: BigRational::zero(),
            entries: Vec::new(),
        }
    }
}

/// Share of the initial distribution owed to the schedule at a height.
pub fn initial_distribution_ratio(height: i32, params: &ConsensusParams) -> BigRational {
    let amount = initial_distribution_amount(height, params);
    if amount.is_zero() {
        return BigRational::zero();
    }
    rational(params.tithe_amount) / amount
}

/// Accumulate a budget's mandated line items into a destination map.
/// Non-positive totals are dropped so verification never demands the
/// impossible from a zero-value component.
pub fn apply_budget<D: Ord + Clone>(
    amount: &BigRational,
    budget: &Budget<D>,
    out: &mut BTreeMap<D, BigRational>,
) {
    let weight_total: u64 = budget.entries.iter().map(|entry| entry.weight).sum();
    if weight_total == 0 {
        return;
    }
    let weight_total = rational(weight_total as Amount);

    for entry in &budget.entries {
        let share =
            amount * &budget.ratio * rational(entry.weight as Amount) / weight_total.clone();
        let slot = out
            .entry(entry.destination.clone())
            .or_insert_with(BigRational::zero);
        *slot += share;
    }

    out.retain(|_, total| total.is_positive());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{format_money, COIN, MAX_MONEY};
    use crate::params::{consensus_params, Network};

    const RATE: i64 = 1 << 20;

    #[test]
    fn zero_depth_is_identity() {
        let value = rational(12_345 * COIN);
        assert_eq!(time_adjusted_value(&value, 0, RATE), value);
    }

    #[test]
    fn positive_depth_decays_negative_depth_appreciates() {
        let value = rational(COIN);
        let decayed = time_adjusted_value(&value, 100, RATE);
        let appreciated = time_adjusted_value(&value, -100, RATE);
        assert!(decayed < value);
        assert!(decayed.is_positive());
        assert!(appreciated > value);
    }

    #[test]
    fn single_step_matches_exact_ratio() {
        // One block of demurrage is exactly (R-1)/R: the denominator is a
        // power of two, so the fixed mantissa holds it without rounding.
        let value = rational(RATE);
        let expected = rational(RATE - 1);
        assert_eq!(time_adjusted_value(&value, 1, RATE), expected);
    }

    #[test]
    fn shallow_adjustments_compose_exactly() {
        // (R-1)^d stays inside the 128-bit mantissa through depth six, so
        // composing 2 + 3 equals a single 5-block adjustment bit for bit.
        let value = rational(7 * COIN);
        let two_then_three = time_adjusted_value(&time_adjusted_value(&value, 2, RATE), 3, RATE);
        let five = time_adjusted_value(&value, 5, RATE);
        assert_eq!(two_then_three, five);
    }

    #[test]
    fn deep_adjustment_is_deterministic() {
        let value = rational(MAX_MONEY);
        let a = time_adjusted_value(&value, 161_280, RATE);
        let b = time_adjusted_value(&value, 161_280, RATE);
        assert_eq!(a, b);
        assert!(a < value);
        assert!(a.is_positive());
    }

    #[test]
    fn distribution_ramp_endpoints() {
        let params = consensus_params(Network::Mainnet);
        let at_zero = initial_distribution_amount(0, &params);
        assert_eq!(
            at_zero,
            rational(params.tithe_amount + params.initial_subsidy)
        );
        assert!(initial_distribution_amount(params.eq_height, &params).is_zero());
        assert!(initial_distribution_amount(params.eq_height - 1, &params)
            > rational(params.tithe_amount));
    }

    #[test]
    fn genesis_block_value_matches_chain() {
        // The genesis coinbase claims 750.56846171 coins, the floor of the
        // height-zero block value. Keeps the subsidy constants honest.
        let params = consensus_params(Network::Mainnet);
        let value = block_value(0, &BigRational::zero(), &params);
        assert_eq!(
            value.floor().to_integer(),
            num_bigint::BigInt::from(75_056_846_171i64)
        );
        assert_eq!(format_money(&value), "750.56846171");
    }

    #[test]
    fn perpetual_subsidy_floor() {
        let params = consensus_params(Network::Mainnet);
        let perpetual = perpetual_subsidy_amount(&params);
        assert_eq!(
            perpetual.floor().to_integer(),
            num_bigint::BigInt::from(9_536_743_164i64)
        );
    }

    #[test]
    fn budget_splits_by_weight_and_drops_nonpositive() {
        let budget = Budget {
            ratio: BigRational::new(1.into(), 2.into()),
            entries: vec![
                BudgetEntry {
                    weight: 3,
                    destination: "a",
                },
                BudgetEntry {
                    weight: 1,
                    destination: "b",
                },
            ],
        };
        let mut out = BTreeMap::new();
        apply_budget(&rational(8 * COIN), &budget, &mut out);
        assert_eq!(out.get("a"), Some(&rational(3 * COIN)));
        assert_eq!(out.get("b"), Some(&rational(COIN)));

        let zero_budget: Budget<&str> = Budget {
            ratio: BigRational::one(),
            entries: vec![BudgetEntry {
                weight: 1,
                destination: "c",
            }],
        };
        apply_budget(&BigRational::zero(), &zero_budget, &mut out);
        assert!(!out.contains_key("c"));
    }

    #[test]
    fn distribution_ratio_times_amount_is_tithe() {
        let params = consensus_params(Network::Mainnet);
        for height in [0, 1, 503, 504, 80_000, params.eq_height - 1] {
            let amount = initial_distribution_amount(height, &params);
            let ratio = initial_distribution_ratio(height, &params);
            assert_eq!(ratio * amount, rational(params.tithe_amount));
        }
        assert!(initial_distribution_ratio(params.eq_height, &params).is_zero());
    }
}
