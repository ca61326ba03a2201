//! Compact target utilities and the work-retarget rules.
//!
//! Two retarget regimes share this module: the legacy 2016-block interval
//! inherited from the Bitcoin lineage, and the 144-tap FIR-filtered
//! controller that replaced it at the filter threshold. The filter output
//! feeds a rational adjustment factor; all factor arithmetic is exact
//! integer math so every node derives the same compact target.

use std::cmp::Ordering;

use primitive_types::{U256, U512};
use xcoind_consensus::{ConsensusParams, Hash256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    EmptyChain,
    NonContiguous,
    InsufficientHistory,
    Compact(CompactError),
}

impl std::fmt::Display for DifficultyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifficultyError::EmptyChain => write!(f, "no headers available"),
            DifficultyError::NonContiguous => {
                write!(f, "header list must be contiguous by height")
            }
            DifficultyError::InsufficientHistory => {
                write!(f, "not enough headers for retarget window")
            }
            DifficultyError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DifficultyError {}

impl From<CompactError> for DifficultyError {
    fn from(err: CompactError) -> Self {
        DifficultyError::Compact(err)
    }
}

/// Header fields the retarget rules consume; callers supply a contiguous
/// run ending at the chain tip.
#[derive(Clone, Copy, Debug)]
pub struct HeaderInfo {
    pub height: i64,
    pub time: i64,
    pub bits: u32,
}

/// FIR window length, in blocks.
pub const FILTER_WINDOW: usize = 144;

/// Symmetric 144-tap low-pass filter over inter-block intervals. The taps
/// sum to 2^31; the handful of off-by-one taps relative to perfect symmetry
/// are consensus-critical and copied verbatim.
pub const FILTER_COEFF: [i64; FILTER_WINDOW] = [
    -845859, -459003, -573589, -703227, -848199, -1008841,
    -1183669, -1372046, -1573247, -1787578, -2011503, -2243311,
    -2482346, -2723079, -2964681, -3202200, -3432186, -3650186,
    -3851924, -4032122, -4185340, -4306430, -4389146, -4427786,
    -4416716, -4349289, -4220031, -4022692, -3751740, -3401468,
    -2966915, -2443070, -1825548, -1110759, -295281, 623307,
    1646668, 2775970, 4011152, 5351560, 6795424, 8340274,
    9982332, 11717130, 13539111, 15441640, 17417389, 19457954,
    21554056, 23695744, 25872220, 28072119, 30283431, 32493814,
    34690317, 36859911, 38989360, 41065293, 43074548, 45004087,
    46841170, 48573558, 50189545, 51678076, 53028839, 54232505,
    55280554, 56165609, 56881415, 57422788, 57785876, 57968085,
    57968084, 57785876, 57422788, 56881415, 56165609, 55280554,
    54232505, 53028839, 51678076, 50189545, 48573558, 46841170,
    45004087, 43074548, 41065293, 38989360, 36859911, 34690317,
    32493814, 30283431, 28072119, 25872220, 23695744, 21554057,
    19457953, 17417389, 15441640, 13539111, 11717130, 9982332,
    8340274, 6795424, 5351560, 4011152, 2775970, 1646668,
    623307, -295281, -1110759, -1825548, -2443070, -2966915,
    -3401468, -3751740, -4022692, -4220031, -4349289, -4416715,
    -4427787, -4389146, -4306430, -4185340, -4032122, -3851924,
    -3650186, -3432186, -3202200, -2964681, -2723079, -2482346,
    -2243311, -2011503, -1787578, -1573247, -1372046, -1183669,
    -1008841, -848199, -703227, -573589, -459003, -845858,
];

/// Filter gain. The deployed network uses 41/400 = 0.1025, despite the
/// value having been documented as 0.025 historically; 41/400 is what
/// every node enforces.
const GAIN_NUM: i128 = 41;
const GAIN_DEN: i128 = 400;
/// Per-retarget clamp on the adjustment factor.
const LIMITER_UP: (i128, i128) = (211, 200);
const LIMITER_DOWN: (i128, i128) = (200, 211);

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    if negative {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        let shift = 8 * (3 - size);
        word >>= shift;
        U256::from(word)
    } else {
        let shift = 8 * (size - 3);
        U256::from(word) << shift
    };

    if word != 0 {
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    let value = compact_to_u256(bits)?;
    Ok(value.to_little_endian())
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    let hash_value = U256::from_little_endian(hash);
    let target_value = U256::from_little_endian(target);
    hash_value <= target_value
}

pub fn cmp_hash(a: &Hash256, b: &Hash256) -> Ordering {
    U256::from_little_endian(a).cmp(&U256::from_little_endian(b))
}

/// Expected hash count a block's target represents: `2^256 / (target+1)`.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

/// Next required compact target.
///
/// `chain` is a contiguous run of headers ending at the current tip; it
/// must reach back one full legacy interval when a legacy retarget is due,
/// and is padded with `pow_target_spacing` when the filter window reaches
/// past genesis. `next_block_time` feeds the testnet min-difficulty rule.
pub fn get_next_work_required(
    chain: &[HeaderInfo],
    next_block_time: Option<i64>,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let pow_limit_bits = target_to_compact(&params.pow_limit);

    // Genesis block.
    let Some(last) = chain.last() else {
        return Ok(pow_limit_bits);
    };
    ensure_contiguous(chain)?;

    // One-time override at the filter transition, stepping back to the
    // difficulty that preceded the final legacy retarget.
    if let Some(transition_bits) = params.filter_transition_bits {
        if last.height == (params.diff_filter_threshold as i64) - 1 {
            return Ok(transition_bits);
        }
    }

    let use_filter = last.height >= (params.diff_filter_threshold as i64) - 1;
    let interval = if use_filter {
        params.filtered_interval
    } else {
        params.original_interval
    };

    // Only change once per interval.
    if (last.height + 1) % interval != 0 {
        if params.allow_min_difficulty_blocks {
            // A block arriving after twice the target spacing may use the
            // work limit; otherwise step back through the relaxed blocks to
            // the last real difficulty.
            if let Some(next_time) = next_block_time {
                if next_time > last.time + params.pow_target_spacing * 2 {
                    return Ok(pow_limit_bits);
                }
            }
            let mut idx = chain.len() - 1;
            while idx > 0 && chain[idx].height % interval != 0 && chain[idx].bits == pow_limit_bits
            {
                idx -= 1;
            }
            return Ok(chain[idx].bits);
        }
        return Ok(last.bits);
    }

    let (mut factor_num, mut factor_den) = if use_filter {
        filtered_adjustment(chain, params.pow_target_spacing)
    } else {
        legacy_adjustment(chain, params)?
    };

    // Retarget: new target = old target / factor.
    let gcd = gcd_i128(factor_num.unsigned_abs(), factor_den.unsigned_abs()) as i128;
    factor_num /= gcd;
    factor_den /= gcd;

    let old_target = compact_to_u256(last.bits)?;
    let widened = old_target.full_mul(U256::from(factor_den as u128));
    let next = widened / U512::from(factor_num as u128);

    let pow_limit = U256::from_little_endian(&params.pow_limit);
    let next = if next > U512::from(pow_limit) {
        pow_limit
    } else {
        U256::try_from(next).expect("bounded by pow limit")
    };

    Ok(u256_to_compact(next))
}

/// FIR-filtered adjustment factor as an exact fraction.
fn filtered_adjustment(chain: &[HeaderInfo], target_spacing: i64) -> (i128, i128) {
    let mut deltas = [0i64; FILTER_WINDOW];
    let mut idx = 0usize;
    let mut pos = chain.len();
    while idx < FILTER_WINDOW && pos >= 2 {
        deltas[idx] = chain[pos - 1].time - chain[pos - 2].time;
        idx += 1;
        pos -= 1;
    }
    while idx < FILTER_WINDOW {
        deltas[idx] = target_spacing;
        idx += 1;
    }

    let mut filtered_time: i128 = 0;
    for (coeff, delta) in FILTER_COEFF.iter().zip(deltas.iter()) {
        filtered_time += (*coeff as i128) * (*delta as i128);
    }

    // factor = 1 - gain * (filtered/2^31 - T) / T, with T the target
    // spacing. Everything over the common denominator gain_den * T * 2^31.
    let two_31: i128 = 1 << 31;
    let spacing = target_spacing as i128;
    let den = GAIN_DEN * spacing * two_31;
    let num = den - GAIN_NUM * (filtered_time - spacing * two_31);

    clamp_factor(num, den)
}

fn clamp_factor(num: i128, den: i128) -> (i128, i128) {
    debug_assert!(den > 0);
    if num * LIMITER_UP.1 > LIMITER_UP.0 * den {
        LIMITER_UP
    } else if num * LIMITER_DOWN.1 < LIMITER_DOWN.0 * den {
        LIMITER_DOWN
    } else {
        (num, den)
    }
}

/// Legacy every-2016-blocks adjustment factor.
fn legacy_adjustment(
    chain: &[HeaderInfo],
    params: &ConsensusParams,
) -> Result<(i128, i128), DifficultyError> {
    let last = chain.last().ok_or(DifficultyError::EmptyChain)?;
    let interval = params.original_interval;
    let target_timespan = params.original_target_timespan();

    // Go back the full period unless this is the first retarget after
    // genesis; looking back one block short of the interval lets a majority
    // miner walk difficulty at will.
    let blocks_to_go_back = if last.height + 1 == interval {
        interval - 1
    } else {
        interval
    };

    let last_idx = chain.len() - 1;
    let first_idx = last_idx
        .checked_sub(blocks_to_go_back as usize)
        .ok_or(DifficultyError::InsufficientHistory)?;
    let first = &chain[first_idx];

    let mut actual_timespan = last.time - first.time;
    if actual_timespan < target_timespan / 4 {
        actual_timespan = target_timespan / 4;
    }
    if actual_timespan > target_timespan * 4 {
        actual_timespan = target_timespan * 4;
    }

    Ok((target_timespan as i128, actual_timespan as i128))
}

fn ensure_contiguous(chain: &[HeaderInfo]) -> Result<(), DifficultyError> {
    let base = chain[0].height;
    for (idx, header) in chain.iter().enumerate() {
        if header.height != base + idx as i64 {
            return Err(DifficultyError::NonContiguous);
        }
    }
    Ok(())
}

fn gcd_i128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let rem = a % b;
        a = b;
        b = rem;
    }
    a.max(1)
}
