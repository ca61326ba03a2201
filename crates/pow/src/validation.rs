//! Proof-of-work validation against a claimed compact target.

use primitive_types::U256;
use xcoind_consensus::{ConsensusParams, Hash256};

use crate::difficulty::{compact_to_u256, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    Compact(CompactError),
    /// Claimed target is zero or easier than the work limit.
    TargetOutOfRange,
    /// Block hash does not meet the claimed target.
    HashAboveTarget,
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::Compact(err) => write!(f, "{err}"),
            PowError::TargetOutOfRange => write!(f, "nBits below minimum work"),
            PowError::HashAboveTarget => write!(f, "hash doesn't match nBits"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

pub fn check_proof_of_work(
    hash: &Hash256,
    bits: u32,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    let target = compact_to_u256(bits)?;
    let pow_limit = U256::from_little_endian(&params.pow_limit);

    if target.is_zero() || target > pow_limit {
        return Err(PowError::TargetOutOfRange);
    }
    if U256::from_little_endian(hash) > target {
        return Err(PowError::HashAboveTarget);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::target_to_compact;
    use xcoind_consensus::{consensus_params, Network};

    #[test]
    fn limit_target_accepts_zero_hash() {
        let params = consensus_params(Network::Mainnet);
        let bits = target_to_compact(&params.pow_limit);
        assert_eq!(check_proof_of_work(&[0u8; 32], bits, &params), Ok(()));
    }

    #[test]
    fn rejects_target_above_limit() {
        let params = consensus_params(Network::Mainnet);
        // Work limit is ~0 >> 32; a size-31 full-word target is easier.
        let bits = 0x1f7fffff;
        assert_eq!(
            check_proof_of_work(&[0u8; 32], bits, &params),
            Err(PowError::TargetOutOfRange)
        );
    }

    #[test]
    fn rejects_hash_above_target() {
        let params = consensus_params(Network::Mainnet);
        let bits = target_to_compact(&params.pow_limit);
        let hash = [0xffu8; 32];
        assert_eq!(
            check_proof_of_work(&hash, bits, &params),
            Err(PowError::HashAboveTarget)
        );
    }
}
