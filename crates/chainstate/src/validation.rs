//! Context-free validation and the rule-error taxonomy.

use std::collections::HashSet;

use xcoind_consensus::constants::{MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE};
use xcoind_consensus::money::{money_range, MAX_MONEY};
use xcoind_consensus::{ConsensusParams, Hash256};
use xcoind_pow::validation::{check_proof_of_work, PowError};
use xcoind_primitives::block::Block;
use xcoind_primitives::merkle::merkle_root;
use xcoind_primitives::script;
use xcoind_primitives::transaction::{Transaction, TxOut};

/// What kind of failure a rejected item represents; drives peer scoring
/// and orphan handling at the dispatch layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectKind {
    /// Structural failure; always fatal to the item.
    Malformed,
    /// Consensus rule violation.
    ConsensusInvalid,
    /// References an unknown ancestor; candidate for an orphan pool.
    MissingParent,
    /// Local policy (standardness, fees); no peer penalty.
    PolicyReject,
    /// Storage-layer trouble; the item may be retried.
    Transient,
    /// Already known; silently skipped.
    Duplicate,
}

/// A rejection plus the misbehaviour score the provider earns for it.
#[derive(Clone, Debug)]
pub struct RuleError {
    pub kind: RejectKind,
    pub dos: u32,
    pub message: String,
}

impl RuleError {
    pub fn malformed(dos: u32, message: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Malformed,
            dos,
            message: message.into(),
        }
    }

    pub fn consensus(dos: u32, message: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::ConsensusInvalid,
            dos,
            message: message.into(),
        }
    }

    pub fn missing_parent(message: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::MissingParent,
            dos: 0,
            message: message.into(),
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::PolicyReject,
            dos: 0,
            message: message.into(),
        }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Duplicate,
            dos: 0,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuleError {}

impl From<PowError> for RuleError {
    fn from(err: PowError) -> Self {
        RuleError::consensus(50, err.to_string())
    }
}

/// Signature oracle. Script interpretation and ECDSA live outside the
/// consensus core; connect-time input checks call through this trait.
pub trait SignatureVerifier: Send + Sync {
    fn verify_signature(
        &self,
        prev_out: &TxOut,
        tx: &Transaction,
        input_index: usize,
        strict_pay_to_script_hash: bool,
    ) -> bool;
}

/// Context-free transaction checks; safe to run on orphans.
pub fn check_transaction(tx: &Transaction) -> Result<(), RuleError> {
    if tx.vin.is_empty() {
        return Err(RuleError::malformed(10, "vin empty"));
    }
    if tx.vout.is_empty() {
        return Err(RuleError::malformed(10, "vout empty"));
    }
    if tx.serialized_size() > MAX_BLOCK_SIZE {
        return Err(RuleError::malformed(100, "transaction size limits failed"));
    }
    if tx.ref_height < 0 {
        return Err(RuleError::malformed(100, "ref height less than zero"));
    }

    let mut value_out: i64 = 0;
    for output in &tx.vout {
        if output.value < 0 {
            return Err(RuleError::consensus(100, "txout value negative"));
        }
        if output.value > MAX_MONEY {
            return Err(RuleError::consensus(100, "txout value too high"));
        }
        value_out = value_out
            .checked_add(output.value)
            .filter(|total| money_range(*total))
            .ok_or_else(|| RuleError::consensus(100, "txout total out of range"))?;
    }

    let mut seen = HashSet::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if !seen.insert(input.prevout.clone()) {
            return Err(RuleError::malformed(0, "duplicate inputs"));
        }
    }

    if tx.is_coinbase() {
        let script_len = tx.vin[0].script_sig.len();
        if !(2..=100).contains(&script_len) {
            return Err(RuleError::malformed(100, "coinbase script size"));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(RuleError::malformed(10, "prevout is null"));
    }

    Ok(())
}

/// Relay standardness; consensus never depends on it, and the test network
/// disables it entirely.
pub fn is_standard_tx(tx: &Transaction) -> bool {
    if tx.version > xcoind_primitives::transaction::CURRENT_VERSION {
        return false;
    }
    for input in &tx.vin {
        // Biggest standard scriptSig is a 3-of-3 multisig pay-to-script-hash.
        if input.script_sig.len() > 500 {
            return false;
        }
        if !script::is_push_only(&input.script_sig) {
            return false;
        }
    }
    for output in &tx.vout {
        if !script::is_standard(&output.script_pubkey) {
            return false;
        }
        if output.value == 0 {
            return false;
        }
    }
    true
}

/// Legacy sigop count over all of a transaction's scripts.
pub fn legacy_sigops(tx: &Transaction) -> u32 {
    let inputs: u32 = tx
        .vin
        .iter()
        .map(|input| script::legacy_sigops(&input.script_sig))
        .sum();
    let outputs: u32 = tx
        .vout
        .iter()
        .map(|output| script::legacy_sigops(&output.script_pubkey))
        .sum();
    inputs + outputs
}

/// Context-free block checks; run before an orphan block is retained.
/// Returns the txid list so callers don't hash twice.
pub fn check_block(
    block: &Block,
    params: &ConsensusParams,
    adjusted_time: i64,
    check_pow: bool,
    check_merkle: bool,
) -> Result<Vec<Hash256>, RuleError> {
    if block.transactions.is_empty() || block.transactions.len() > MAX_BLOCK_SIZE {
        return Err(RuleError::malformed(100, "size limits failed"));
    }
    if block.serialized_size() > MAX_BLOCK_SIZE {
        return Err(RuleError::malformed(100, "size limits failed"));
    }

    if check_pow {
        check_proof_of_work(&block.hash(), block.header.bits, params)?;
    }

    if block.header.time as i64 > adjusted_time + 2 * 60 * 60 {
        return Err(RuleError::consensus(0, "block timestamp too far in the future"));
    }

    if !block.transactions[0].is_coinbase() {
        return Err(RuleError::consensus(100, "first tx is not coinbase"));
    }
    for tx in &block.transactions[1..] {
        if tx.is_coinbase() {
            return Err(RuleError::consensus(100, "more than one coinbase"));
        }
    }

    for tx in &block.transactions {
        check_transaction(tx)?;
    }

    let txids: Vec<Hash256> = block.transactions.iter().map(Transaction::txid).collect();
    let unique: HashSet<&Hash256> = txids.iter().collect();
    if unique.len() != txids.len() {
        return Err(RuleError::consensus(100, "duplicate transaction"));
    }

    let sigops: u32 = block.transactions.iter().map(legacy_sigops).sum();
    if sigops > MAX_BLOCK_SIGOPS {
        return Err(RuleError::consensus(100, "out-of-bounds sigop count"));
    }

    if check_merkle {
        let (root, mutated) = merkle_root(&txids);
        if mutated {
            return Err(RuleError::consensus(100, "duplicate transaction"));
        }
        if root != block.header.merkle_root {
            return Err(RuleError::consensus(100, "merkle root mismatch"));
        }
    }

    Ok(txids)
}

/// Whether a coinbase scriptSig leads with the serialized block height, as
/// the v2 supermajority rule demands.
pub fn coinbase_commits_to_height(tx: &Transaction, height: i32) -> bool {
    if tx.vin.is_empty() {
        return false;
    }
    let expected = script::push_int(height as i64);
    tx.vin[0].script_sig.starts_with(&expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcoind_primitives::outpoint::OutPoint;
    use xcoind_primitives::transaction::TxIn;

    fn basic_tx() -> Transaction {
        Transaction {
            version: 2,
            vin: vec![TxIn {
                prevout: OutPoint::new([1u8; 32], 0),
                script_sig: vec![0x51],
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 1_000,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
            ref_height: 0,
        }
    }

    #[test]
    fn accepts_minimal_transaction() {
        assert!(check_transaction(&basic_tx()).is_ok());
    }

    #[test]
    fn rejects_empty_sides() {
        let mut tx = basic_tx();
        tx.vin.clear();
        assert_eq!(check_transaction(&tx).unwrap_err().dos, 10);

        let mut tx = basic_tx();
        tx.vout.clear();
        assert_eq!(check_transaction(&tx).unwrap_err().dos, 10);
    }

    #[test]
    fn rejects_negative_ref_height_and_values() {
        let mut tx = basic_tx();
        tx.ref_height = -1;
        assert_eq!(check_transaction(&tx).unwrap_err().dos, 100);

        let mut tx = basic_tx();
        tx.vout[0].value = -1;
        assert_eq!(check_transaction(&tx).unwrap_err().dos, 100);

        let mut tx = basic_tx();
        tx.vout[0].value = MAX_MONEY + 1;
        assert!(check_transaction(&tx).is_err());
    }

    #[test]
    fn rejects_output_sum_overflow() {
        let mut tx = basic_tx();
        tx.vout = vec![
            TxOut {
                value: MAX_MONEY,
                script_pubkey: vec![0x51],
            },
            TxOut {
                value: 1,
                script_pubkey: vec![0x51],
            },
        ];
        assert!(check_transaction(&tx).is_err());
    }

    #[test]
    fn rejects_duplicate_inputs() {
        let mut tx = basic_tx();
        tx.vin.push(tx.vin[0].clone());
        let err = check_transaction(&tx).unwrap_err();
        assert_eq!(err.dos, 0);
    }

    #[test]
    fn coinbase_script_bounds() {
        let mut tx = basic_tx();
        tx.vin[0].prevout = OutPoint::null();
        tx.vin[0].script_sig = vec![0x00];
        assert!(check_transaction(&tx).is_err());
        tx.vin[0].script_sig = vec![0x00; 2];
        assert!(check_transaction(&tx).is_ok());
        tx.vin[0].script_sig = vec![0x00; 101];
        assert!(check_transaction(&tx).is_err());
    }

    #[test]
    fn null_prevout_rejected_outside_coinbase() {
        let mut tx = basic_tx();
        tx.vin.push(TxIn {
            prevout: OutPoint::null(),
            script_sig: Vec::new(),
            sequence: u32::MAX,
        });
        let err = check_transaction(&tx).unwrap_err();
        assert_eq!(err.dos, 10);
    }

    #[test]
    fn standardness_rules() {
        let mut tx = basic_tx();
        tx.vout[0].script_pubkey = {
            let mut script = vec![0x76, 0xa9, 0x14];
            script.extend_from_slice(&[5u8; 20]);
            script.extend_from_slice(&[0x88, 0xac]);
            script
        };
        assert!(is_standard_tx(&tx));

        tx.vout[0].value = 0;
        assert!(!is_standard_tx(&tx));
        tx.vout[0].value = 1;

        tx.vin[0].script_sig = vec![0x76];
        assert!(!is_standard_tx(&tx));
        tx.vin[0].script_sig = vec![0x00; 501];
        assert!(!is_standard_tx(&tx));
    }

    #[test]
    fn coinbase_height_commitment() {
        let mut tx = basic_tx();
        tx.vin[0].script_sig = script::push_int(17);
        assert!(coinbase_commits_to_height(&tx, 17));
        assert!(!coinbase_commits_to_height(&tx, 18));
    }
}
