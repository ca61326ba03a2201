//! The transaction memory pool.
//!
//! Holds accepted-but-unconfirmed transactions, tracks which outpoints
//! they spend for conflict detection, enforces relay fee policy with a
//! decaying free-transaction rate limiter, and keeps a bounded pool of
//! orphans whose parents have not arrived yet.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use num_rational::BigRational;
use num_traits::Zero;
use xcoind_chainstate::state::{
    ChainState, FetchInputsError, FetchedInputs, TxSource,
};
use xcoind_chainstate::txindex::{DiskTxPos, TxIndexEntry};
use xcoind_chainstate::validation::{check_transaction, is_standard_tx, RuleError};
use xcoind_consensus::constants::{
    DEFAULT_LIMIT_FREE_RELAY, MAX_BLOCK_SIZE_GEN, MAX_ORPHAN_TRANSACTIONS, MAX_ORPHAN_TX_SIZE,
    MIN_RELAY_TX_FEE, MIN_TX_FEE,
};
use xcoind_consensus::money::{max_money_rational, rational, rational_money_range, CENT};
use xcoind_consensus::{Hash256, Network};
use xcoind_log::{log_debug, log_info};
use xcoind_primitives::encoding;
use xcoind_primitives::hash::hash_fragment;
use xcoind_primitives::outpoint::OutPoint;
use xcoind_primitives::script::{classify, push_only_stack, ScriptTemplate};
use xcoind_primitives::transaction::Transaction;
use xcoind_storage::KeyValueStore;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyKnown,
    ConflictingInput,
    MissingInputs,
    InsufficientFee,
    RateLimited,
    NonStandard,
    Invalid,
}

#[derive(Clone, Debug)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    /// Misbehaviour score for the provider, lifted off the rule error.
    pub dos: u32,
    pub message: String,
}

impl MempoolError {
    fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            dos: 0,
            message: message.into(),
        }
    }

    fn from_rule(error: RuleError) -> Self {
        Self {
            kind: MempoolErrorKind::Invalid,
            dos: error.dos,
            message: error.message,
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeeMode {
    Relay,
    Mining,
}

/// Minimum fee for a transaction entering a block of `block_size` bytes.
/// `block_size == 1` means "standalone relay estimate", the historical
/// sentinel.
pub fn min_fee(
    tx: &Transaction,
    block_size: usize,
    allow_free: bool,
    mode: FeeMode,
) -> BigRational {
    let base_fee = rational(match mode {
        FeeMode::Relay => MIN_RELAY_TX_FEE,
        FeeMode::Mining => MIN_TX_FEE,
    });

    let bytes = tx.serialized_size();
    let new_block_size = block_size + bytes;
    let mut fee = rational(1 + bytes as i64 / 1000) * &base_fee;

    if allow_free {
        if block_size == 1 {
            // Transactions under 10K are free.
            if bytes < 10_000 {
                fee = BigRational::zero();
            }
        } else if new_block_size < 27_000 {
            // Free transaction area of each block.
            fee = BigRational::zero();
        }
    }

    // Dust spam costs the base fee.
    if fee < base_fee {
        for output in &tx.vout {
            if rational(output.value) < rational(CENT) {
                fee = base_fee.clone();
                break;
            }
        }
    }

    // Price out the last half of the block, hard stop at the cap.
    if block_size != 1 && new_block_size >= MAX_BLOCK_SIZE_GEN / 2 {
        if new_block_size >= MAX_BLOCK_SIZE_GEN {
            return max_money_rational();
        }
        let scale = (MAX_BLOCK_SIZE_GEN / (MAX_BLOCK_SIZE_GEN - new_block_size)) as i64;
        fee *= rational(scale);
    }

    if !rational_money_range(&fee) {
        fee = max_money_rational();
    }
    fee
}

/// Exponentially decaying byte counter with a ~10-minute half-life; stores
/// `(value, last_update)` and decays lazily on touch.
#[derive(Debug, Default)]
struct FreeRelayLimiter {
    count: f64,
    last_time: i64,
}

impl FreeRelayLimiter {
    /// Returns false when the free transaction should be rejected.
    fn allow(&mut self, now: i64, bytes: usize, limit: i64, exempt: bool) -> bool {
        let elapsed = (now - self.last_time).max(0);
        self.count *= (1.0f64 - 1.0 / 600.0).powi(elapsed.min(i32::MAX as i64) as i32);
        self.last_time = now;
        // -limitfreerelay unit is thousand-bytes-per-minute.
        if self.count > (limit * 10 * 1000) as f64 && !exempt {
            return false;
        }
        self.count += bytes as f64;
        true
    }
}

struct OrphanTx {
    raw: Vec<u8>,
    parents: Vec<Hash256>,
}

#[derive(Default)]
pub struct Mempool {
    by_hash: HashMap<Hash256, Transaction>,
    by_outpoint: HashMap<OutPoint, (Hash256, u32)>,
    orphans: BTreeMap<Hash256, OrphanTx>,
    orphans_by_parent: HashMap<Hash256, BTreeSet<Hash256>>,
    free_limiter: FreeRelayLimiter,
    pub limit_free_relay: i64,
}

struct PoolView<'a>(&'a HashMap<Hash256, Transaction>);

impl TxSource for PoolView<'_> {
    fn lookup_tx(&self, txid: &Hash256) -> Option<Transaction> {
        self.0.get(txid).cloned()
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self {
            limit_free_relay: DEFAULT_LIMIT_FREE_RELAY,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.by_hash.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.by_hash.get(txid)
    }

    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<(Hash256, u32)> {
        self.by_outpoint.get(outpoint).copied()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        let mut out: Vec<Hash256> = self.by_hash.keys().copied().collect();
        out.sort_unstable();
        out
    }

    /// Admit a loose transaction. `check_inputs` is false only when
    /// resurrecting transactions from a disconnected branch, whose inputs
    /// were valid on the abandoned chain.
    pub fn accept<S: KeyValueStore>(
        &mut self,
        chain: &ChainState<S>,
        tx: Transaction,
        check_inputs: bool,
        from_wallet: bool,
        now: i64,
    ) -> Result<Hash256, MempoolError> {
        check_transaction(&tx).map_err(MempoolError::from_rule)?;

        if tx.ref_height > chain.best_height() + 20 {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "ref height too far ahead",
            ));
        }

        // Coinbase is only valid in a block, not as a loose transaction.
        if tx.is_coinbase() {
            return Err(MempoolError {
                kind: MempoolErrorKind::Invalid,
                dos: 100,
                message: "coinbase as individual tx".to_string(),
            });
        }

        // Lock times past the 32-bit signed range confuse legacy peers.
        if tx.lock_time > i32::MAX as u32 {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "lock time beyond 2038",
            ));
        }

        let enforce_standard = chain.params().network == Network::Mainnet;
        if enforce_standard && !is_standard_tx(&tx) {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "nonstandard transaction type",
            ));
        }

        let txid = tx.txid();
        if self.by_hash.contains_key(&txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyKnown,
                "already in memory pool",
            ));
        }
        if check_inputs {
            let known = chain.contains_tx(&txid).map_err(|err| {
                MempoolError::new(MempoolErrorKind::Invalid, err.to_string())
            })?;
            if known {
                return Err(MempoolError::new(
                    MempoolErrorKind::AlreadyKnown,
                    "already in block index",
                ));
            }
        }

        // Conflicts with pool members; replacement is disabled.
        for input in &tx.vin {
            if self.by_outpoint.contains_key(&input.prevout) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    "input already spent in pool",
                ));
            }
        }

        if check_inputs {
            let view = PoolView(&self.by_hash);
            let empty = HashMap::new();
            let inputs = match chain.fetch_inputs(&tx, &empty, false, false, Some(&view)) {
                Ok(inputs) => inputs,
                Err(FetchInputsError::MissingParent) => {
                    return Err(MempoolError::new(
                        MempoolErrorKind::MissingInputs,
                        "missing inputs",
                    ))
                }
                Err(FetchInputsError::Invalid(err)) => {
                    return Err(MempoolError::from_rule(err))
                }
                Err(FetchInputsError::State(err)) => {
                    return Err(MempoolError::new(MempoolErrorKind::Invalid, err.to_string()))
                }
            };

            if enforce_standard && !are_inputs_standard(&tx, &inputs) {
                return Err(MempoolError::new(
                    MempoolErrorKind::NonStandard,
                    "nonstandard transaction input",
                ));
            }

            let value_in = chain.value_in(&tx, &inputs).map_err(MempoolError::from_rule)?;
            let value_out = rational(tx.value_out().unwrap_or_default());
            let fees = value_in - value_out;

            let size = tx.serialized_size();
            let required = min_fee(&tx, 1000, true, FeeMode::Relay);
            if fees < required {
                return Err(MempoolError::new(
                    MempoolErrorKind::InsufficientFee,
                    "not enough fees",
                ));
            }

            // Continuously rate-limit free transactions so a burst of
            // penny-flooding cannot crowd out paying traffic.
            if fees < rational(MIN_RELAY_TX_FEE)
                && !self
                    .free_limiter
                    .allow(now, size, self.limit_free_relay, from_wallet)
            {
                return Err(MempoolError::new(
                    MempoolErrorKind::RateLimited,
                    "free transaction rejected by rate limiter",
                ));
            }

            // Full connect against a throwaway pool; done last so the
            // expensive signature checks cannot be used for CPU exhaustion.
            let mut throwaway: HashMap<Hash256, TxIndexEntry> = HashMap::new();
            chain
                .connect_inputs(
                    &tx,
                    inputs,
                    &mut throwaway,
                    DiskTxPos::MEMPOOL,
                    chain.best_tip(),
                    false,
                    false,
                    true,
                )
                .map_err(MempoolError::from_rule)?;
        }

        for (index, input) in tx.vin.iter().enumerate() {
            self.by_outpoint
                .insert(input.prevout.clone(), (txid, index as u32));
        }
        self.by_hash.insert(txid, tx);
        log_debug!(
            "mempool accepted {} (pool size {})",
            hash_fragment(&txid),
            self.by_hash.len()
        );
        Ok(txid)
    }

    /// Remove a transaction (confirmed or conflicting); returns whether it
    /// was present.
    pub fn remove(&mut self, txid: &Hash256) -> bool {
        let Some(tx) = self.by_hash.remove(txid) else {
            return false;
        };
        for input in &tx.vin {
            self.by_outpoint.remove(&input.prevout);
        }
        true
    }

    // ---- orphan transactions ----

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn has_orphan(&self, txid: &Hash256) -> bool {
        self.orphans.contains_key(txid)
    }

    pub fn orphan_raw(&self, txid: &Hash256) -> Option<&[u8]> {
        self.orphans.get(txid).map(|orphan| orphan.raw.as_slice())
    }

    /// Retain a transaction whose parents are unknown. Oversized orphans
    /// are refused outright; a legitimate sender will rebroadcast once the
    /// parents confirm.
    pub fn add_orphan(&mut self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        if self.orphans.contains_key(&txid) {
            return false;
        }
        let raw = encoding::encode(tx);
        if raw.len() > MAX_ORPHAN_TX_SIZE {
            log_info!(
                "ignoring large orphan tx (size {}, hash {})",
                raw.len(),
                hash_fragment(&txid)
            );
            return false;
        }
        let parents: Vec<Hash256> = tx.vin.iter().map(|input| input.prevout.hash).collect();
        for parent in &parents {
            self.orphans_by_parent.entry(*parent).or_default().insert(txid);
        }
        self.orphans.insert(txid, OrphanTx { raw, parents });
        log_debug!(
            "stored orphan tx {} (map size {})",
            hash_fragment(&txid),
            self.orphans.len()
        );
        true
    }

    pub fn erase_orphan(&mut self, txid: &Hash256) {
        let Some(orphan) = self.orphans.remove(txid) else {
            return;
        };
        for parent in &orphan.parents {
            if let Some(children) = self.orphans_by_parent.get_mut(parent) {
                children.remove(txid);
                if children.is_empty() {
                    self.orphans_by_parent.remove(parent);
                }
            }
        }
    }

    /// Orphans waiting on a given parent, in hash order.
    pub fn orphans_for_parent(&self, parent: &Hash256) -> Vec<Hash256> {
        self.orphans_by_parent
            .get(parent)
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Evict random orphans until at most `max_orphans` remain: draw a
    /// random 256-bit key and remove the first orphan at or after it,
    /// wrapping to the start. Uniform in expectation, no full scan.
    pub fn limit_orphans(&mut self, max_orphans: usize) -> usize {
        let mut evicted = 0usize;
        while self.orphans.len() > max_orphans {
            let probe: Hash256 = rand::random();
            let victim = self
                .orphans
                .range(probe..)
                .next()
                .or_else(|| self.orphans.iter().next())
                .map(|(txid, _)| *txid)
                .expect("orphans non-empty");
            self.erase_orphan(&victim);
            evicted += 1;
        }
        evicted
    }

    pub fn default_orphan_cap() -> usize {
        MAX_ORPHAN_TRANSACTIONS
    }
}

/// Policy check on inputs: every previous output script must match a
/// standard template and the scriptSig must push exactly the expected
/// stack, with the P2SH redeem script itself standard and not nested.
pub fn are_inputs_standard(tx: &Transaction, inputs: &FetchedInputs) -> bool {
    if tx.is_coinbase() {
        return true;
    }
    for input in &tx.vin {
        let Some(fetched) = inputs.get(&input.prevout.hash) else {
            return false;
        };
        let Some(prev_out) = fetched.tx.vout.get(input.prevout.index as usize) else {
            return false;
        };
        let Some(template) = classify(&prev_out.script_pubkey) else {
            return false;
        };
        let mut args_expected = template.script_sig_args_expected();

        let Some(stack) = push_only_stack(&input.script_sig) else {
            return false;
        };

        if let ScriptTemplate::ScriptHash { .. } = template {
            let Some(redeem_script) = stack.last() else {
                return false;
            };
            let Some(redeem_template) = classify(redeem_script) else {
                return false;
            };
            if matches!(redeem_template, ScriptTemplate::ScriptHash { .. }) {
                return false;
            }
            args_expected += redeem_template.script_sig_args_expected();
        }

        if stack.len() != args_expected {
            return false;
        }
    }
    true
}
