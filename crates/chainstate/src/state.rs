//! The chain state aggregate: block-index tree, best-chain selection,
//! block connection and disconnection, and reorganisation.
//!
//! All entry points that mutate the chain take `&mut self`; the process
//! embeds this aggregate behind one lock, which is the serialisation point
//! for every consensus mutation. Storage writes are staged in the
//! transactional [`ChainDb`] so a failed connect or a crash mid-reorg
//! leaves the persistent state at the previous commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use num_rational::BigRational;
use num_traits::Zero;
use primitive_types::U256;
use xcoind_consensus::constants::{COINBASE_MATURITY, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE};
use xcoind_consensus::money::{rational, rational_money_range};
use xcoind_consensus::params::{initial_distribution_schedule, schedule_index, Network};
use xcoind_consensus::rewards::{
    apply_budget, block_value, initial_distribution_amount, initial_distribution_ratio,
    perpetual_subsidy_amount, time_adjusted_value, Budget, BudgetEntry,
};
use xcoind_consensus::{ChainParams, Hash256};
use xcoind_log::{log_debug, log_error, log_info, log_warn};
use xcoind_pow::difficulty::{block_proof, get_next_work_required, HeaderInfo};
use xcoind_primitives::address::address_to_destination;
use xcoind_primitives::block::Block;
use xcoind_primitives::encoding::{self, Decodable, DecodeError, Decoder};
use xcoind_primitives::hash::hash_fragment;
use xcoind_primitives::script::{extract_destination, p2sh_sigops, Destination};
use xcoind_primitives::transaction::Transaction;
use xcoind_storage::KeyValueStore;

use crate::blockindex::{BlockIndexArena, BlockIndexNode, DiskBlockIndex, NodeId};
use crate::db::{ChainDb, ChainDbError};
use crate::events::{ChainEvent, EventBus};
use crate::flatfiles::{BlockFileError, BlockFileStore};
use crate::genesis::genesis_block;
use crate::txindex::{DiskTxPos, TxIndexEntry};
use crate::validation::{
    check_block, coinbase_commits_to_height, legacy_sigops, RuleError, SignatureVerifier,
};

const MTP_WINDOW: usize = 11;
/// Headers handed to the retarget: one legacy interval plus the tip.
const RETARGET_HISTORY: usize = 2017;

#[derive(Debug)]
pub enum ChainStateError {
    Rule(RuleError),
    Db(ChainDbError),
    BlockFile(BlockFileError),
    Decode(DecodeError),
    Corrupt(&'static str),
}

impl std::fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStateError::Rule(err) => write!(f, "{err}"),
            ChainStateError::Db(err) => write!(f, "{err}"),
            ChainStateError::BlockFile(err) => write!(f, "{err}"),
            ChainStateError::Decode(err) => write!(f, "{err}"),
            ChainStateError::Corrupt(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<RuleError> for ChainStateError {
    fn from(err: RuleError) -> Self {
        ChainStateError::Rule(err)
    }
}

impl From<ChainDbError> for ChainStateError {
    fn from(err: ChainDbError) -> Self {
        ChainStateError::Db(err)
    }
}

impl From<BlockFileError> for ChainStateError {
    fn from(err: BlockFileError) -> Self {
        ChainStateError::BlockFile(err)
    }
}

impl From<DecodeError> for ChainStateError {
    fn from(err: DecodeError) -> Self {
        ChainStateError::Decode(err)
    }
}

/// A fetched previous transaction with its spent-vector.
#[derive(Clone, Debug)]
pub struct FetchedInput {
    pub index: TxIndexEntry,
    pub tx: Transaction,
}

pub type FetchedInputs = HashMap<Hash256, FetchedInput>;

/// Where `fetch_inputs` may look besides the staged changes and the
/// persistent index: the caller's view of the memory pool.
pub trait TxSource {
    fn lookup_tx(&self, txid: &Hash256) -> Option<Transaction>;
}

/// Failure modes of input fetching. Missing parents are a distinct signal
/// so the caller can park the transaction in an orphan pool instead of
/// penalising the provider.
#[derive(Debug)]
pub enum FetchInputsError {
    MissingParent,
    Invalid(RuleError),
    State(ChainStateError),
}

impl From<ChainDbError> for FetchInputsError {
    fn from(err: ChainDbError) -> Self {
        FetchInputsError::State(ChainStateError::Db(err))
    }
}

impl From<BlockFileError> for FetchInputsError {
    fn from(err: BlockFileError) -> Self {
        FetchInputsError::State(ChainStateError::BlockFile(err))
    }
}

/// Mempool reconciliation produced by a best-chain change: transactions to
/// feed back through `accept` and transactions to drop as confirmed.
#[derive(Debug, Default)]
pub struct MempoolSync {
    pub resurrect: Vec<Transaction>,
    pub remove: Vec<Transaction>,
}

pub struct ChainState<S> {
    params: ChainParams,
    db: ChainDb<S>,
    blocks: BlockFileStore,
    arena: BlockIndexArena,
    genesis: Option<NodeId>,
    best_tip: Option<NodeId>,
    best_height: i32,
    best_chain_work: U256,
    hash_best_chain: Hash256,
    best_invalid_work: U256,
    adjusted_time: i64,
    events: EventBus,
    verifier: Arc<dyn SignatureVerifier>,
    schedule: Vec<Destination>,
}

impl<S: KeyValueStore> ChainState<S> {
    pub fn new(
        store: Arc<S>,
        blocks: BlockFileStore,
        params: ChainParams,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let schedule = initial_distribution_schedule()
            .iter()
            .map(|address| {
                // The schedule is stored in its mainnet rendering; the
                // decoded key hashes are what consensus compares.
                address_to_destination(address, Network::Mainnet)
                    .expect("hard-coded schedule address")
            })
            .collect();
        Self {
            db: ChainDb::new(store),
            blocks,
            params,
            arena: BlockIndexArena::new(),
            genesis: None,
            best_tip: None,
            best_height: -1,
            best_chain_work: U256::zero(),
            hash_best_chain: [0u8; 32],
            best_invalid_work: U256::zero(),
            adjusted_time: 0,
            events: EventBus::new(),
            verifier,
            schedule,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn arena(&self) -> &BlockIndexArena {
        &self.arena
    }

    pub fn best_tip(&self) -> Option<NodeId> {
        self.best_tip
    }

    pub fn best_height(&self) -> i32 {
        self.best_height
    }

    pub fn best_hash(&self) -> Hash256 {
        self.hash_best_chain
    }

    pub fn best_chain_work(&self) -> U256 {
        self.best_chain_work
    }

    pub fn best_invalid_work(&self) -> U256 {
        self.best_invalid_work
    }

    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Network-adjusted wall clock, fed in by the network layer.
    pub fn set_adjusted_time(&mut self, now: i64) {
        self.adjusted_time = now;
    }

    pub fn adjusted_time(&self) -> i64 {
        self.adjusted_time
    }

    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.arena.contains(hash)
    }

    /// Whether a transaction is in the persistent index.
    pub fn contains_tx(&self, txid: &Hash256) -> Result<bool, ChainStateError> {
        Ok(self.db.contains_tx(txid)?)
    }

    pub fn tx_index_entry(&self, txid: &Hash256) -> Result<Option<TxIndexEntry>, ChainStateError> {
        Ok(self.db.read_tx_index(txid)?)
    }

    pub fn read_block(&self, id: NodeId) -> Result<Block, ChainStateError> {
        let node = self.arena.node(id);
        let payload = self.blocks.read_record(node.file, node.block_pos)?;
        Ok(encoding::decode(&payload)?)
    }

    /// Load the block index from storage; with `allow_new`, an empty store
    /// is initialised with the genesis block.
    pub fn load_block_index(&mut self, allow_new: bool) -> Result<(), ChainStateError> {
        let entries = self.db.read_block_index()?;

        for (hash, disk) in &entries {
            self.arena.insert(BlockIndexNode {
                hash: *hash,
                prev: None,
                next_on_best: None,
                height: disk.height,
                chain_work: disk.chain_work_value(),
                file: disk.file,
                block_pos: disk.block_pos,
                version: disk.version,
                prev_hash: disk.prev_hash,
                merkle_root: disk.merkle_root,
                time: disk.time,
                bits: disk.bits,
                nonce: disk.nonce,
            });
        }
        for (hash, disk) in &entries {
            let id = self.arena.lookup(hash).expect("just inserted");
            let prev = self.arena.lookup(&disk.prev_hash);
            let next = if disk.next_hash != [0u8; 32] {
                self.arena.lookup(&disk.next_hash)
            } else {
                None
            };
            let node = self.arena.node_mut(id);
            node.prev = prev;
            node.next_on_best = next;
            if node.height == 0 {
                self.genesis = Some(id);
            }
        }

        if self.arena.is_empty() {
            if !allow_new {
                return Err(ChainStateError::Corrupt("block index empty"));
            }
            let block = genesis_block(&self.params.consensus);
            let expected = self.params.consensus.hash_genesis_block;
            if expected != [0u8; 32] && block.hash() != expected {
                return Err(ChainStateError::Corrupt("constructed genesis hash mismatch"));
            }
            log_info!("initialising new block index from genesis");
            let payload = encoding::encode(&block);
            let (file, pos) = self.blocks.append(&payload)?;
            self.add_to_block_index(&block, file, pos)?;
            return Ok(());
        }

        let best_hash = self
            .db
            .read_hash_best_chain()?
            .ok_or(ChainStateError::Corrupt("best chain hash missing"))?;
        let tip = self
            .arena
            .lookup(&best_hash)
            .ok_or(ChainStateError::Corrupt("best chain hash not in index"))?;
        let node = self.arena.node(tip);
        self.best_tip = Some(tip);
        self.best_height = node.height;
        self.best_chain_work = node.chain_work;
        self.hash_best_chain = best_hash;
        self.best_invalid_work = self.db.read_best_invalid_work()?;
        log_info!(
            "loaded block index: {} nodes, best height {} ({})",
            self.arena.len(),
            self.best_height,
            hash_fragment(&best_hash)
        );
        Ok(())
    }

    /// Handle a fully decoded candidate block. Missing-parent rejections
    /// carry `RejectKind::MissingParent`; the caller parks those in its
    /// orphan pool.
    pub fn process_block(&mut self, block: &Block) -> Result<MempoolSync, ChainStateError> {
        let hash = block.hash();
        if self.arena.contains(&hash) {
            return Err(RuleError::duplicate("already have block").into());
        }

        check_block(
            block,
            &self.params.consensus,
            self.adjusted_time,
            true,
            true,
        )?;

        // Spam guard: off the current tip, a block stamped before the last
        // checkpoint can never be accepted.
        if block.header.prev_block != self.hash_best_chain {
            if let Some(checkpoint_time) = self.last_checkpoint_time() {
                if (block.header.time as i64) < checkpoint_time {
                    return Err(RuleError::consensus(
                        100,
                        "block with timestamp before last checkpoint",
                    )
                    .into());
                }
            }
        }

        if !self.arena.contains(&block.header.prev_block) {
            return Err(RuleError::missing_parent(format!(
                "orphan block, prev={}",
                hash_fragment(&block.header.prev_block)
            ))
            .into());
        }

        let sync = self.accept_block(block)?;
        log_debug!("accepted block {}", hash_fragment(&hash));
        Ok(sync)
    }

    /// Context-dependent acceptance: parent known, all contextual rules.
    pub fn accept_block(&mut self, block: &Block) -> Result<MempoolSync, ChainStateError> {
        let hash = block.hash();
        if self.arena.contains(&hash) {
            return Err(RuleError::duplicate("block already in index").into());
        }

        let prev_id = self
            .arena
            .lookup(&block.header.prev_block)
            .ok_or_else(|| RuleError::consensus(10, "prev block not found"))?;
        let height = self.arena.node(prev_id).height + 1;

        let required_bits = self.next_work_required(prev_id, block.header.time as i64)?;
        if block.header.bits != required_bits {
            return Err(RuleError::consensus(100, "incorrect proof of work").into());
        }

        if (block.header.time as i64) <= self.arena.median_time_past(prev_id, MTP_WINDOW) {
            return Err(RuleError::consensus(0, "block's timestamp is too early").into());
        }

        for tx in &block.transactions {
            if !tx.is_final(height, block.header.time as i64) {
                return Err(RuleError::consensus(10, "contains a non-final transaction").into());
            }
        }

        if let Some(checkpoint) = self.params.consensus.checkpoint_for_height(height) {
            if checkpoint.hash != hash {
                return Err(RuleError::consensus(
                    100,
                    format!("rejected by checkpoint lock-in at {height}"),
                )
                .into());
            }
        }

        let consensus = &self.params.consensus;
        if block.header.version < 2
            && self.is_super_majority(
                2,
                prev_id,
                consensus.majority_reject_block_outdated,
                consensus.majority_window,
            )
        {
            return Err(RuleError::consensus(0, "rejected nVersion=1 block").into());
        }
        if block.header.version >= 2
            && self.is_super_majority(
                2,
                prev_id,
                consensus.majority_enforce_block_upgrade,
                consensus.majority_window,
            )
            && !coinbase_commits_to_height(&block.transactions[0], height)
        {
            return Err(RuleError::consensus(100, "block height mismatch in coinbase").into());
        }

        let payload = encoding::encode(block);
        let (file, pos) = self.blocks.append(&payload)?;
        self.add_to_block_index(block, file, pos)
    }

    /// Insert a block into the index tree; if its branch now carries the
    /// most work, pivot the best chain onto it.
    pub fn add_to_block_index(
        &mut self,
        block: &Block,
        file: u32,
        block_pos: u32,
    ) -> Result<MempoolSync, ChainStateError> {
        let hash = block.hash();
        if self.arena.contains(&hash) {
            return Err(RuleError::duplicate("block index entry exists").into());
        }

        let prev_id = self.arena.lookup(&block.header.prev_block);
        let (height, prev_work) = match prev_id {
            Some(prev) => {
                let node = self.arena.node(prev);
                (node.height + 1, node.chain_work)
            }
            None => (0, U256::zero()),
        };
        let work = block_proof(block.header.bits)
            .map_err(|_| ChainStateError::Corrupt("invalid compact bits in indexed block"))?;
        let node = BlockIndexNode {
            hash,
            prev: prev_id,
            next_on_best: None,
            height,
            chain_work: prev_work + work,
            file,
            block_pos,
            version: block.header.version,
            prev_hash: block.header.prev_block,
            merkle_root: block.header.merkle_root,
            time: block.header.time,
            bits: block.header.bits,
            nonce: block.header.nonce,
        };
        let id = self.arena.insert(node);

        self.db.begin()?;
        self.stage_block_index(id, [0u8; 32])?;
        self.db.commit()?;

        if self.arena.node(id).chain_work > self.best_chain_work {
            self.set_best_chain(id, block)
        } else {
            Ok(MempoolSync::default())
        }
    }

    /// Make `new_id` the best tip. The caller guarantees it carries more
    /// work than the current best.
    fn set_best_chain(
        &mut self,
        new_id: NodeId,
        block: &Block,
    ) -> Result<MempoolSync, ChainStateError> {
        let hash = self.arena.node(new_id).hash;
        let mut sync = MempoolSync::default();

        self.db.begin()?;
        if self.genesis.is_none() && self.arena.node(new_id).prev.is_none() {
            self.db.write_hash_best_chain(&hash)?;
            self.db.commit()?;
            self.genesis = Some(new_id);
        } else if block.header.prev_block == self.hash_best_chain {
            self.set_best_chain_inner(new_id, block, &mut sync)?;
        } else {
            // The first block on the new branch that overtakes the current
            // best work bounds the single-transaction reorganisation; the
            // rest reconnect one by one in their own transactions.
            let mut intermediate = new_id;
            let mut postponed: Vec<NodeId> = Vec::new();
            while let Some(prev) = self.arena.node(intermediate).prev {
                if self.arena.node(prev).chain_work > self.best_chain_work {
                    postponed.push(intermediate);
                    intermediate = prev;
                } else {
                    break;
                }
            }
            if !postponed.is_empty() {
                log_info!("postponing {} reconnects", postponed.len());
            }

            if let Err(err) = self.reorganize(intermediate, &mut sync) {
                self.db.abort();
                self.invalid_chain_found(new_id);
                return Err(err);
            }

            for id in postponed.iter().rev() {
                let block = match self.read_block(*id) {
                    Ok(block) => block,
                    Err(err) => {
                        log_warn!("set best chain: reading postponed block failed: {err}");
                        break;
                    }
                };
                if self.db.begin().is_err() {
                    break;
                }
                // A failure here is not fatal; the reorganisation to the
                // intermediate tip already committed.
                if self.set_best_chain_inner(*id, &block, &mut sync).is_err() {
                    break;
                }
            }
        }

        let tip = self.arena.node(new_id);
        self.best_tip = Some(new_id);
        self.best_height = tip.height;
        self.best_chain_work = tip.chain_work;
        self.hash_best_chain = hash;
        log_info!(
            "new best={} height={} work={}",
            hash_fragment(&hash),
            self.best_height,
            self.best_chain_work
        );
        self.events.publish(ChainEvent::NewTip {
            hash,
            height: self.best_height,
        });
        Ok(sync)
    }

    /// Attach one block extending the current best chain. Expects an open
    /// transaction and commits it.
    fn set_best_chain_inner(
        &mut self,
        id: NodeId,
        block: &Block,
        sync: &mut MempoolSync,
    ) -> Result<(), ChainStateError> {
        let hash = self.arena.node(id).hash;
        let connected = self
            .connect_block_txn(block, id)
            .and_then(|_| self.db.write_hash_best_chain(&hash).map_err(Into::into));
        if let Err(err) = connected {
            self.db.abort();
            self.invalid_chain_found(id);
            return Err(err);
        }
        self.db.commit()?;

        if let Some(prev) = self.arena.node(id).prev {
            self.arena.node_mut(prev).next_on_best = Some(id);
        }
        sync.remove.extend(block.transactions.iter().cloned());
        Ok(())
    }

    /// Pivot from the current best tip to `new_tip` in one storage
    /// transaction. Expects an open transaction and commits it.
    fn reorganize(
        &mut self,
        new_tip: NodeId,
        sync: &mut MempoolSync,
    ) -> Result<(), ChainStateError> {
        let best = self
            .best_tip
            .ok_or(ChainStateError::Corrupt("reorganize without best tip"))?;
        let fork = self
            .arena
            .find_fork(best, new_tip)
            .ok_or(ChainStateError::Corrupt("disconnected block tree"))?;

        let mut disconnect = Vec::new();
        let mut cursor = best;
        while cursor != fork {
            disconnect.push(cursor);
            cursor = self
                .arena
                .node(cursor)
                .prev
                .ok_or(ChainStateError::Corrupt("fork below genesis"))?;
        }

        let mut connect = Vec::new();
        let mut cursor = new_tip;
        while cursor != fork {
            connect.push(cursor);
            cursor = self
                .arena
                .node(cursor)
                .prev
                .ok_or(ChainStateError::Corrupt("fork below genesis"))?;
        }
        connect.reverse();

        log_info!(
            "reorganize: disconnect {} blocks, connect {}",
            disconnect.len(),
            connect.len()
        );

        for id in &disconnect {
            let block = self.read_block(*id)?;
            self.disconnect_block_txn(&block, *id)?;
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    sync.resurrect.push(tx.clone());
                }
            }
        }

        for id in &connect {
            let block = self.read_block(*id)?;
            self.connect_block_txn(&block, *id)?;
            sync.remove.extend(block.transactions.iter().cloned());
        }

        self.db
            .write_hash_best_chain(&self.arena.node(new_tip).hash)?;
        // Disk state first; memory links change only after the commit.
        self.db.commit()?;

        for id in &disconnect {
            if let Some(prev) = self.arena.node(*id).prev {
                self.arena.node_mut(prev).next_on_best = None;
            }
        }
        for id in &connect {
            if let Some(prev) = self.arena.node(*id).prev {
                self.arena.node_mut(prev).next_on_best = Some(*id);
            }
        }

        log_info!("reorganize: done");
        Ok(())
    }

    /// Validate and apply a block's transactions against the index, inside
    /// the open transaction.
    fn connect_block_txn(&mut self, block: &Block, id: NodeId) -> Result<(), ChainStateError> {
        check_block(
            block,
            &self.params.consensus,
            self.adjusted_time.max(block.header.time as i64),
            true,
            true,
        )?;

        let (height, file, block_pos, hash) = {
            let node = self.arena.node(id);
            (node.height, node.file, node.block_pos, node.hash)
        };

        // BIP30: reject a transaction whose txid would shadow an existing,
        // not-fully-spent entry, outside the two historical exceptions.
        let enforce_bip30 = !self
            .params
            .consensus
            .bip30_exceptions
            .iter()
            .any(|(exc_height, exc_hash)| *exc_height == height && *exc_hash == hash);

        let strict_p2sh = block.header.time >= self.params.consensus.bip16_switch_time;

        let offsets = block.transaction_offsets();
        let mut queued: HashMap<Hash256, TxIndexEntry> = HashMap::new();
        let mut fees = BigRational::zero();
        let mut sigops: u32 = 0;

        for (tx_number, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();

            if enforce_bip30 {
                if let Some(existing) = self.db.read_tx_index(&txid)? {
                    if !existing.fully_spent() {
                        return Err(RuleError::consensus(
                            0,
                            "tried to overwrite not-fully-spent transaction",
                        )
                        .into());
                    }
                }
            }

            sigops += legacy_sigops(tx);
            if sigops > MAX_BLOCK_SIGOPS {
                return Err(RuleError::consensus(100, "too many sigops").into());
            }

            let pos_this = DiskTxPos::new(file, block_pos, block_pos + offsets[tx_number] as u32);

            if !tx.is_coinbase() {
                let inputs = match self.fetch_inputs(tx, &queued, true, false, None) {
                    Ok(inputs) => inputs,
                    Err(FetchInputsError::Invalid(err)) => return Err(err.into()),
                    Err(FetchInputsError::State(err)) => return Err(err),
                    Err(FetchInputsError::MissingParent) => {
                        return Err(RuleError::consensus(
                            0,
                            "unable to fetch inputs for block transaction",
                        )
                        .into())
                    }
                };

                if strict_p2sh {
                    // Count P2SH redeem-script sigops so a block cannot be
                    // made arbitrarily expensive to verify.
                    for input in &tx.vin {
                        let fetched = &inputs[&input.prevout.hash];
                        let prev_out = &fetched.tx.vout[input.prevout.index as usize];
                        sigops += p2sh_sigops(&prev_out.script_pubkey, &input.script_sig);
                    }
                    if sigops > MAX_BLOCK_SIGOPS {
                        return Err(RuleError::consensus(100, "too many sigops").into());
                    }
                }

                if tx.ref_height > height {
                    return Err(
                        RuleError::consensus(100, "tx ref height above block height").into(),
                    );
                }

                let value_in = self.value_in(tx, &inputs)?;
                let value_out = rational(
                    tx.value_out()
                        .ok_or_else(|| RuleError::consensus(100, "txout total out of range"))?,
                );
                let net = &value_in - &value_out;
                fees += time_adjusted_value(
                    &net,
                    (height - tx.ref_height) as i64,
                    self.params.consensus.demurrage_rate,
                );

                self.connect_inputs(
                    tx,
                    inputs,
                    &mut queued,
                    pos_this,
                    Some(id),
                    true,
                    false,
                    strict_p2sh,
                )?;
            }

            queued.insert(txid, TxIndexEntry::new(pos_this, tx.vout.len()));
        }

        let coinbase = &block.transactions[0];
        if coinbase.ref_height != height {
            return Err(RuleError::consensus(100, "coinbase height != block height").into());
        }
        let coinbase_out = rational(
            coinbase
                .value_out()
                .ok_or_else(|| RuleError::consensus(100, "coinbase value out of range"))?,
        );
        let actual = time_adjusted_value(
            &coinbase_out,
            (height - coinbase.ref_height) as i64,
            self.params.consensus.demurrage_rate,
        );
        let allowed = block_value(height, &fees, &self.params.consensus);
        if actual > allowed {
            return Err(RuleError::consensus(0, "coinbase pays too much").into());
        }

        let mut mandated: BTreeMap<Destination, BigRational> = BTreeMap::new();
        let id_amount = initial_distribution_amount(height, &self.params.consensus);
        apply_budget(
            &id_amount,
            &self.initial_distribution_budget(height),
            &mut mandated,
        );
        let perpetual = perpetual_subsidy_amount(&self.params.consensus);
        apply_budget(&perpetual, &Budget::empty(), &mut mandated);
        apply_budget(&fees, &Budget::empty(), &mut mandated);

        self.verify_budget(&mandated, &block.transactions, height)?;

        for (txid, entry) in &queued {
            self.db.update_tx_index(txid, entry)?;
        }

        if let Some(prev) = self.arena.node(id).prev {
            self.stage_block_index(prev, hash)?;
        }
        Ok(())
    }

    /// Undo a connected block inside the open transaction. The reverse of
    /// `connect_block_txn`, in reverse transaction order.
    fn disconnect_block_txn(&mut self, block: &Block, id: NodeId) -> Result<(), ChainStateError> {
        for tx in block.transactions.iter().rev() {
            self.disconnect_inputs(tx)?;
        }
        if let Some(prev) = self.arena.node(id).prev {
            self.stage_block_index(prev, [0u8; 32])?;
        }
        Ok(())
    }

    /// The per-height mandated budget: a single schedule entry taking
    /// `tithe / initial_distribution` of the initial distribution.
    fn initial_distribution_budget(&self, height: i32) -> Budget<Destination> {
        let consensus = &self.params.consensus;
        if height >= consensus.eq_height {
            return Budget::empty();
        }
        let index = schedule_index(height, consensus.eq_height);
        Budget {
            ratio: initial_distribution_ratio(height, consensus),
            entries: vec![BudgetEntry {
                weight: 1,
                destination: self.schedule[index],
            }],
        }
    }

    /// Check that every mandated destination received at least its share,
    /// in present value at the block height. Surplus and unrelated
    /// recipients are fine.
    fn verify_budget(
        &self,
        mandated: &BTreeMap<Destination, BigRational>,
        transactions: &[Transaction],
        height: i32,
    ) -> Result<(), ChainStateError> {
        let rate = self.params.consensus.demurrage_rate;
        let mut actuals: BTreeMap<Destination, BigRational> = BTreeMap::new();
        for tx in transactions {
            for output in &tx.vout {
                if let Some(destination) = extract_destination(&output.script_pubkey) {
                    let present = time_adjusted_value(
                        &rational(output.value),
                        (height - tx.ref_height) as i64,
                        rate,
                    );
                    *actuals.entry(destination).or_insert_with(BigRational::zero) += present;
                }
            }
        }

        for (destination, required) in mandated {
            if required <= &BigRational::zero() {
                continue;
            }
            match actuals.get(destination) {
                Some(paid) if paid >= required => {}
                _ => {
                    return Err(RuleError::consensus(
                        100,
                        "block does not meet budget requirements",
                    )
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Locate each input's previous transaction and spent-vector: staged
    /// changes first, then the persistent index, then the caller's mempool.
    pub fn fetch_inputs(
        &self,
        tx: &Transaction,
        test_pool: &HashMap<Hash256, TxIndexEntry>,
        is_block: bool,
        is_miner: bool,
        mempool: Option<&dyn TxSource>,
    ) -> Result<FetchedInputs, FetchInputsError> {
        let mut inputs = FetchedInputs::new();
        if tx.is_coinbase() {
            return Ok(inputs);
        }

        for input in &tx.vin {
            let prev_hash = input.prevout.hash;
            if inputs.contains_key(&prev_hash) {
                continue;
            }

            let (mut entry, found) = if (is_block || is_miner) && test_pool.contains_key(&prev_hash)
            {
                (test_pool[&prev_hash].clone(), true)
            } else {
                match self.db.read_tx_index(&prev_hash)? {
                    Some(entry) => (entry, true),
                    None => (TxIndexEntry::new(DiskTxPos::MEMPOOL, 0), false),
                }
            };
            if !found && (is_block || is_miner) {
                return Err(FetchInputsError::MissingParent);
            }

            let prev_tx = if !found || entry.pos.is_mempool() {
                let source = mempool.ok_or(FetchInputsError::MissingParent)?;
                let prev_tx = source
                    .lookup_tx(&prev_hash)
                    .ok_or(FetchInputsError::MissingParent)?;
                if !found {
                    entry = TxIndexEntry::new(DiskTxPos::MEMPOOL, prev_tx.vout.len());
                }
                prev_tx
            } else {
                let bytes =
                    self.blocks
                        .read_from(entry.pos.file, entry.pos.tx_pos, MAX_BLOCK_SIZE)?;
                let mut decoder = Decoder::new(&bytes);
                Transaction::consensus_decode(&mut decoder).map_err(|_| {
                    FetchInputsError::State(ChainStateError::Corrupt(
                        "indexed transaction unreadable",
                    ))
                })?
            };

            inputs.insert(
                prev_hash,
                FetchedInput {
                    index: entry,
                    tx: prev_tx,
                },
            );
        }

        for input in &tx.vin {
            let fetched = &inputs[&input.prevout.hash];
            let index = input.prevout.index as usize;
            if index >= fetched.tx.vout.len() || index >= fetched.index.spent.len() {
                return Err(FetchInputsError::Invalid(RuleError::consensus(
                    100,
                    "prevout index out of range",
                )));
            }
        }

        Ok(inputs)
    }

    /// Sum of the inputs' present values at the spending transaction's
    /// reference height.
    pub fn value_in(
        &self,
        tx: &Transaction,
        inputs: &FetchedInputs,
    ) -> Result<BigRational, RuleError> {
        if tx.is_coinbase() {
            return Ok(BigRational::zero());
        }
        let rate = self.params.consensus.demurrage_rate;
        let mut total = BigRational::zero();
        for input in &tx.vin {
            let fetched = &inputs[&input.prevout.hash];
            let prev_out = &fetched.tx.vout[input.prevout.index as usize];
            let present = time_adjusted_value(
                &rational(prev_out.value),
                (tx.ref_height - fetched.tx.ref_height) as i64,
                rate,
            );
            if !rational_money_range(&present) {
                return Err(RuleError::consensus(100, "txin values out of range"));
            }
            total += present;
            if !rational_money_range(&total) {
                return Err(RuleError::consensus(100, "txin values out of range"));
            }
        }
        Ok(total)
    }

    /// Claim the inputs' spent slots for this transaction.
    ///
    /// `branch_tip` is the block being connected (or the current best tip
    /// for mempool admission); coinbase maturity is judged along that
    /// branch. Emits updated spent-vectors through `test_pool` when running
    /// under block connection.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_inputs(
        &self,
        tx: &Transaction,
        mut inputs: FetchedInputs,
        test_pool: &mut HashMap<Hash256, TxIndexEntry>,
        pos_this: DiskTxPos,
        branch_tip: Option<NodeId>,
        is_block: bool,
        is_miner: bool,
        strict_p2sh: bool,
    ) -> Result<BigRational, RuleError> {
        if tx.is_coinbase() {
            return Ok(BigRational::zero());
        }

        for input in &tx.vin {
            let fetched = &inputs[&input.prevout.hash];
            let index = input.prevout.index as usize;
            if index >= fetched.tx.vout.len() || index >= fetched.index.spent.len() {
                return Err(RuleError::consensus(100, "prevout index out of range"));
            }

            // A coinbase needs COINBASE_MATURITY confirmations on this
            // branch before it can be spent.
            if fetched.tx.is_coinbase() {
                if let Some(tip) = branch_tip {
                    let tip_height = self.arena.node(tip).height;
                    let mut cursor = Some(tip);
                    while let Some(id) = cursor {
                        let node = self.arena.node(id);
                        let depth = tip_height - node.height;
                        if depth >= COINBASE_MATURITY {
                            break;
                        }
                        if node.block_pos == fetched.index.pos.block_pos
                            && node.file == fetched.index.pos.file
                        {
                            return Err(RuleError::consensus(
                                0,
                                format!("tried to spend coinbase at depth {depth}"),
                            ));
                        }
                        cursor = node.prev;
                    }
                }
            }
        }

        let value_in = self.value_in(tx, &inputs)?;
        let value_out = rational(
            tx.value_out()
                .ok_or_else(|| RuleError::consensus(100, "txout total out of range"))?,
        );
        if value_out > value_in {
            return Err(RuleError::consensus(100, "txout larger than txin"));
        }

        // The loop above holds the cheap checks; signatures are verified
        // only once every input has passed them.
        let skip_signatures =
            is_block && self.best_height < self.params.consensus.total_blocks_estimate();

        for (input_index, input) in tx.vin.iter().enumerate() {
            let prev_hash = input.prevout.hash;
            let slot = input.prevout.index as usize;

            {
                let fetched = &inputs[&prev_hash];
                if fetched.tx.ref_height > tx.ref_height {
                    return Err(RuleError::consensus(100, "input ref height above spender"));
                }

                // Double-spend on this branch. No DoS score here: scoring
                // it would hand an attacker a network-split lever.
                if fetched.index.spent[slot].is_some() {
                    return Err(RuleError::consensus(0, "prev tx already used"));
                }

                if !skip_signatures {
                    let prev_out = &fetched.tx.vout[slot];
                    if !self
                        .verifier
                        .verify_signature(prev_out, tx, input_index, strict_p2sh)
                    {
                        // During the P2SH transition, old peers relay
                        // spends that only fail under strict rules; those
                        // are rejected without a score.
                        if strict_p2sh
                            && self
                                .verifier
                                .verify_signature(prev_out, tx, input_index, false)
                        {
                            return Err(RuleError::consensus(0, "P2SH signature check failed"));
                        }
                        return Err(RuleError::consensus(100, "signature check failed"));
                    }
                }
            }

            let fetched = inputs.get_mut(&prev_hash).expect("fetched above");
            fetched.index.spent[slot] = Some(pos_this);
            if is_block || is_miner {
                test_pool.insert(prev_hash, fetched.index.clone());
            }
        }

        Ok(value_in)
    }

    /// Release the spent slots this transaction claimed and drop its own
    /// index entry.
    pub fn disconnect_inputs(&mut self, tx: &Transaction) -> Result<(), ChainStateError> {
        if !tx.is_coinbase() {
            for input in &tx.vin {
                let mut entry = self
                    .db
                    .read_tx_index(&input.prevout.hash)?
                    .ok_or(ChainStateError::Corrupt("tx index read failed on disconnect"))?;
                let slot = input.prevout.index as usize;
                if slot >= entry.spent.len() {
                    return Err(ChainStateError::Corrupt("prevout index out of range"));
                }
                entry.spent[slot] = None;
                self.db.update_tx_index(&input.prevout.hash, &entry)?;
            }
        }

        // A duplicate of this transaction may have been reorganised away
        // already; erasing an absent entry is harmless.
        self.db.erase_tx_index(&tx.txid())?;
        Ok(())
    }

    /// Compact target the next block after `prev_id` must carry.
    pub fn next_work_required(
        &self,
        prev_id: NodeId,
        next_block_time: i64,
    ) -> Result<u32, ChainStateError> {
        let mut history = Vec::with_capacity(RETARGET_HISTORY);
        let mut cursor = Some(prev_id);
        while let Some(id) = cursor {
            if history.len() == RETARGET_HISTORY {
                break;
            }
            let node = self.arena.node(id);
            history.push(HeaderInfo {
                height: node.height as i64,
                time: node.time as i64,
                bits: node.bits,
            });
            cursor = node.prev;
        }
        history.reverse();
        get_next_work_required(&history, Some(next_block_time), &self.params.consensus)
            .map_err(|_| ChainStateError::Corrupt("difficulty calculation failed"))
    }

    fn is_super_majority(
        &self,
        min_version: i32,
        start: NodeId,
        required: u32,
        window: u32,
    ) -> bool {
        let mut found = 0u32;
        let mut cursor = Some(start);
        let mut checked = 0u32;
        while let Some(id) = cursor {
            if checked >= window || found >= required {
                break;
            }
            let node = self.arena.node(id);
            if node.version >= min_version {
                found += 1;
            }
            checked += 1;
            cursor = node.prev;
        }
        found >= required
    }

    /// A higher-work branch turned out invalid: remember its work so the
    /// operator can be warned, but never displace the best chain.
    fn invalid_chain_found(&mut self, id: NodeId) {
        let node = self.arena.node(id);
        if node.chain_work > self.best_invalid_work {
            self.best_invalid_work = node.chain_work;
            let work = self.best_invalid_work;
            if self.db.begin().is_ok() {
                let _ = self.db.write_best_invalid_work(work);
                let _ = self.db.commit();
            }
        }
        log_error!(
            "invalid chain found: block {} height {} work {}",
            hash_fragment(&node.hash),
            node.height,
            node.chain_work
        );
    }

    fn last_checkpoint_time(&self) -> Option<i64> {
        self.params
            .consensus
            .checkpoints
            .iter()
            .rev()
            .find_map(|checkpoint| {
                self.arena
                    .lookup(&checkpoint.hash)
                    .map(|id| self.arena.node(id).time as i64)
            })
    }

    fn stage_block_index(&mut self, id: NodeId, next_hash: Hash256) -> Result<(), ChainDbError> {
        let node = self.arena.node(id);
        let hash = node.hash;
        let entry = DiskBlockIndex::from_node(node, next_hash);
        self.db.write_block_index(&hash, &entry)
    }

    /// Hashes of the best chain strictly after `start`, for `getblocks`
    /// style queries; walks the forward links.
    pub fn best_chain_after(&self, start: Option<NodeId>, limit: usize) -> Vec<Hash256> {
        let mut out = Vec::new();
        let mut cursor = match start {
            Some(id) => self.arena.node(id).next_on_best,
            None => self.genesis,
        };
        while let Some(id) = cursor {
            if out.len() == limit {
                break;
            }
            out.push(self.arena.node(id).hash);
            cursor = self.arena.node(id).next_on_best;
        }
        out
    }

    /// Most recent block from `locator` that lies on the best chain.
    pub fn locate_best_chain_block(&self, locator: &[Hash256]) -> Option<NodeId> {
        for hash in locator {
            if let Some(id) = self.arena.lookup(hash) {
                if self.is_on_best_chain(id) {
                    return Some(id);
                }
            }
        }
        self.genesis
    }

    pub fn is_on_best_chain(&self, id: NodeId) -> bool {
        let node = self.arena.node(id);
        if node.next_on_best.is_some() {
            return true;
        }
        self.best_tip == Some(id)
    }

    /// Exponentially thinning locator ending at genesis, for outbound
    /// `getblocks` requests.
    pub fn block_locator(&self) -> Vec<Hash256> {
        let mut out = Vec::new();
        let Some(tip) = self.best_tip else {
            return out;
        };
        let mut step = 1usize;
        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            out.push(self.arena.node(id).hash);
            if out.len() > 10 {
                step *= 2;
            }
            cursor = self.arena.ancestor(id, step);
            if cursor.map(|id| self.arena.node(id).height) == Some(0) {
                break;
            }
        }
        if let Some(genesis) = self.genesis {
            let genesis_hash = self.arena.node(genesis).hash;
            if out.last() != Some(&genesis_hash) {
                out.push(genesis_hash);
            }
        }
        out
    }
}

/// Verifier that accepts every signature; stands in where the script
/// engine is out of process (and in tests).
pub struct AcceptAllSignatures;

impl SignatureVerifier for AcceptAllSignatures {
    fn verify_signature(
        &self,
        _prev_out: &xcoind_primitives::transaction::TxOut,
        _tx: &Transaction,
        _input_index: usize,
        _strict_pay_to_script_hash: bool,
    ) -> bool {
        true
    }
}

