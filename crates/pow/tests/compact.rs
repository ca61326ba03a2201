use primitive_types::U256;
use xcoind_consensus::{consensus_params, Network};
use xcoind_pow::difficulty::{
    block_proof, compact_to_u256, get_next_work_required, target_to_compact, u256_to_compact,
    HeaderInfo,
};

#[test]
fn compact_round_trips_known_values() {
    for bits in [0x1d00ffffu32, 0x1b0404cb, 0x1b01c13a, 0x207fffff] {
        let target = compact_to_u256(bits).expect("target");
        assert_eq!(u256_to_compact(target), bits);
    }
}

#[test]
fn compact_rejects_negative_and_overflow() {
    assert!(compact_to_u256(0x01803456).is_err());
    assert!(compact_to_u256(0x23000001).is_err());
}

#[test]
fn block_proof_of_limit_target() {
    // Difficulty-1 target (compact 0x1d00ffff): proof is the classic
    // 0x100010001 expected-hash count.
    let proof = block_proof(0x1d00ffff).expect("proof");
    assert_eq!(proof, U256::from(0x1_0001_0001u64));
}

fn spaced_chain(base_height: i64, count: usize, spacing: i64, bits: u32) -> Vec<HeaderInfo> {
    (0..count)
        .map(|offset| HeaderInfo {
            height: base_height + offset as i64,
            time: 1_000_000 + offset as i64 * spacing,
            bits,
        })
        .collect()
}

#[test]
fn mid_interval_keeps_previous_bits() {
    let params = consensus_params(Network::Mainnet);
    let chain = spaced_chain(0, 5, 120, 0x1c0a0a0a);
    let bits = get_next_work_required(&chain, None, &params).expect("bits");
    assert_eq!(bits, 0x1c0a0a0a);
}

#[test]
fn filter_transition_returns_override() {
    let params = consensus_params(Network::Mainnet);
    let last_height = params.diff_filter_threshold as i64 - 1;
    let chain = spaced_chain(last_height - 200, 201, 120, 0x1c0a0a0a);
    let bits = get_next_work_required(&chain, None, &params).expect("bits");
    assert_eq!(bits, 0x1b01c13a);
}

#[test]
fn filtered_retarget_is_stable_under_perfect_timing() {
    let params = consensus_params(Network::Mainnet);
    // Land on a filtered retarget boundary: (height + 1) % 9 == 0.
    let mut last_height = params.diff_filter_threshold as i64 + 200;
    while (last_height + 1) % params.filtered_interval != 0 {
        last_height += 1;
    }
    let count = 200usize;
    let chain = spaced_chain(last_height - count as i64 + 1, count, 120, 0x1c0a0a0a);
    let bits = get_next_work_required(&chain, None, &params).expect("bits");
    assert_eq!(bits, 0x1c0a0a0a);
}

#[test]
fn filtered_retarget_never_exceeds_clamp() {
    let params = consensus_params(Network::Mainnet);
    let mut last_height = params.diff_filter_threshold as i64 + 200;
    while (last_height + 1) % params.filtered_interval != 0 {
        last_height += 1;
    }
    let count = 200usize;

    for spacing in [1i64, 20, 60, 240, 6_000] {
        let chain = spaced_chain(last_height - count as i64 + 1, count, spacing, 0x1c0a0a0a);
        let bits = get_next_work_required(&chain, None, &params).expect("bits");
        let old = compact_to_u256(0x1c0a0a0a).expect("old");
        let new = compact_to_u256(bits).expect("new");
        // new = old / f with f clamped to [200/211, 211/200].
        assert!(new <= old * U256::from(211u64) / U256::from(200u64) + U256::from(1u64));
        assert!(new >= old * U256::from(200u64) / U256::from(211u64) - U256::from(1u64));
    }
}

#[test]
fn legacy_retarget_clamps_at_four_x() {
    let params = consensus_params(Network::Mainnet);
    // First legacy retarget: heights 0..=2015 on chain, next block is 2016.
    let count = 2016usize;

    // Instant blocks: difficulty rises by the 1/4 clamp exactly.
    let chain = spaced_chain(0, count, 0, 0x1c0a0a0a);
    let bits = get_next_work_required(&chain, None, &params).expect("bits");
    let old = compact_to_u256(0x1c0a0a0a).expect("old");
    let new = compact_to_u256(bits).expect("new");
    assert_eq!(u256_to_compact(old / U256::from(4u64)), u256_to_compact(new));

    // Glacial blocks: target relaxes by at most 4x.
    let chain = spaced_chain(0, count, 10_000_000, 0x1c0a0a0a);
    let bits = get_next_work_required(&chain, None, &params).expect("bits");
    let new = compact_to_u256(bits).expect("new");
    assert_eq!(u256_to_compact(old * U256::from(4u64)), u256_to_compact(new));
}

#[test]
fn testnet_relaxes_after_double_spacing_gap() {
    let params = consensus_params(Network::Testnet);
    let pow_limit_bits = target_to_compact(&params.pow_limit);
    let chain = spaced_chain(0, 5, 120, 0x1c0a0a0a);
    let last_time = chain.last().expect("chain").time;

    let bits = get_next_work_required(&chain, Some(last_time + 241), &params).expect("bits");
    assert_eq!(bits, pow_limit_bits);

    let bits = get_next_work_required(&chain, Some(last_time + 120), &params).expect("bits");
    assert_eq!(bits, 0x1c0a0a0a);
}

#[test]
fn testnet_steps_past_relaxed_ancestors() {
    let params = consensus_params(Network::Testnet);
    let pow_limit_bits = target_to_compact(&params.pow_limit);
    // Heights 1..=4 after a real-difficulty block at height 0... the walk
    // must land on the non-relaxed bits.
    let mut chain = spaced_chain(0, 5, 120, pow_limit_bits);
    chain[0].bits = 0x1c0a0a0a;
    let last_time = chain.last().expect("chain").time;
    let bits = get_next_work_required(&chain, Some(last_time + 120), &params).expect("bits");
    assert_eq!(bits, 0x1c0a0a0a);
}
