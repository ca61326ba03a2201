//! Consensus constants, network parameters, and the demurrage engine.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;

/// 256-bit hash, little-endian byte order (matching the wire encoding).
pub type Hash256 = [u8; 32];

pub use params::{
    chain_params, consensus_params, hash256_from_hex, ChainParams, Checkpoint, ConsensusParams,
    Network,
};
pub use rewards::{
    apply_budget, block_value, initial_distribution_amount, perpetual_subsidy_amount,
    time_adjusted_value, Budget, BudgetEntry,
};
