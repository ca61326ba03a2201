//! Peer message dispatcher.
//!
//! Consumes fully decoded peer messages and drives the chain state and the
//! memory pool; wire framing, sockets, and peer discovery live elsewhere.
//! Lock order is fixed: the chain lock (the process-wide "main lock")
//! first, the mempool lock nested under it; the peer table and the orphan
//! block pool are leaf locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use xcoind_chainstate::events::ChainEvent;
use xcoind_chainstate::state::{ChainState, ChainStateError, MempoolSync};
use xcoind_chainstate::validation::RejectKind;
use xcoind_consensus::constants::{BAN_SCORE_THRESHOLD, MAX_INV_SZ};
use xcoind_consensus::Hash256;
use xcoind_log::{log_debug, log_info, log_warn};
use xcoind_primitives::block::{Block, BlockHeader};
use xcoind_primitives::encoding;
use xcoind_primitives::hash::hash_fragment;
use xcoind_primitives::transaction::Transaction;
use xcoind_storage::KeyValueStore;

use crate::mempool::{Mempool, MempoolError, MempoolErrorKind};

pub type PeerId = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvKind {
    Tx,
    Block,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Inv {
    pub kind: InvKind,
    pub hash: Hash256,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerAddress {
    pub services: u64,
    pub host: String,
    pub port: u16,
}

/// A decoded peer message; the same shapes flow in both directions.
#[derive(Clone, Debug)]
pub enum NetworkMessage {
    Version { version: i32, start_height: i32 },
    Verack,
    Addr(Vec<PeerAddress>),
    Inv(Vec<Inv>),
    GetData(Vec<Inv>),
    GetBlocks { locator: Vec<Hash256>, hash_stop: Hash256 },
    GetHeaders { locator: Vec<Hash256>, hash_stop: Hash256 },
    Headers(Vec<BlockHeader>),
    Tx(Transaction),
    Block(Block),
    Mempool,
    Ping(u64),
    Pong(u64),
    Alert(Vec<u8>),
    GetAddr,
}

#[derive(Clone, Debug, Default)]
pub struct PeerState {
    pub version: i32,
    pub start_height: i32,
    pub misbehavior: u32,
    pub banned: bool,
    pub hash_continue: Option<Hash256>,
}

/// Blocks whose parent has not arrived, keyed both ways.
#[derive(Default)]
pub struct OrphanBlockPool {
    by_hash: HashMap<Hash256, Block>,
    by_prev: HashMap<Hash256, Vec<Hash256>>,
}

impl OrphanBlockPool {
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn insert(&mut self, block: Block) {
        let hash = block.hash();
        if self.by_hash.contains_key(&hash) {
            return;
        }
        self.by_prev
            .entry(block.header.prev_block)
            .or_default()
            .push(hash);
        self.by_hash.insert(hash, block);
    }

    pub fn take_children(&mut self, parent: &Hash256) -> Vec<Block> {
        let Some(hashes) = self.by_prev.remove(parent) else {
            return Vec::new();
        };
        hashes
            .into_iter()
            .filter_map(|hash| self.by_hash.remove(&hash))
            .collect()
    }

    /// Deepest missing ancestor of an orphan: the block to request from
    /// the network to root the dangling subtree.
    pub fn root_of(&self, hash: &Hash256) -> Hash256 {
        let mut cursor = *hash;
        while let Some(block) = self.by_hash.get(&cursor) {
            cursor = block.header.prev_block;
        }
        cursor
    }
}

pub struct Node<S> {
    chain: Mutex<ChainState<S>>,
    mempool: Mutex<Mempool>,
    peers: Mutex<HashMap<PeerId, PeerState>>,
    orphan_blocks: Mutex<OrphanBlockPool>,
    shutdown: Arc<AtomicBool>,
}

type Outbound = Vec<(PeerId, NetworkMessage)>;

impl<S: KeyValueStore> Node<S> {
    pub fn new(chain: ChainState<S>) -> Self {
        Self {
            chain: Mutex::new(chain),
            mempool: Mutex::new(Mempool::new()),
            peers: Mutex::new(HashMap::new()),
            orphan_blocks: Mutex::new(OrphanBlockPool::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn chain(&self) -> MutexGuard<'_, ChainState<S>> {
        self.chain.lock().expect("chain lock")
    }

    pub fn mempool(&self) -> MutexGuard<'_, Mempool> {
        self.mempool.lock().expect("mempool lock")
    }

    pub fn peer(&self, id: PeerId) -> Option<PeerState> {
        self.peers.lock().expect("peer lock").get(&id).cloned()
    }

    pub fn orphan_block_count(&self) -> usize {
        self.orphan_blocks.lock().expect("orphan lock").len()
    }

    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default()
    }

    fn misbehaving(&self, peer: PeerId, score: u32) {
        let mut peers = self.peers.lock().expect("peer lock");
        let state = peers.entry(peer).or_default();
        state.misbehavior += score;
        if state.misbehavior >= BAN_SCORE_THRESHOLD {
            state.banned = true;
            log_warn!("peer {peer} banned (misbehavior {})", state.misbehavior);
        }
    }

    fn other_peers(&self, from: PeerId) -> Vec<PeerId> {
        self.peers
            .lock()
            .expect("peer lock")
            .iter()
            .filter(|(id, state)| **id != from && !state.banned)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Dispatch one decoded message. Messages from a single peer must be
    /// fed in receipt order. Returns the messages to send in response.
    pub fn process_message(&self, peer: PeerId, message: NetworkMessage) -> Outbound {
        if self.shutdown.load(Ordering::Relaxed) {
            return Vec::new();
        }
        if self.peer(peer).map(|state| state.banned).unwrap_or(false) {
            return Vec::new();
        }

        match message {
            NetworkMessage::Version {
                version,
                start_height,
            } => self.handle_version(peer, version, start_height),
            NetworkMessage::Verack => Vec::new(),
            NetworkMessage::Addr(addresses) => {
                // Address management is out of scope; just bound the spam.
                if addresses.len() > 1000 {
                    self.misbehaving(peer, 20);
                }
                Vec::new()
            }
            NetworkMessage::Inv(items) => self.handle_inv(peer, items),
            NetworkMessage::GetData(items) => self.handle_getdata(peer, items),
            NetworkMessage::GetBlocks { locator, hash_stop } => {
                self.handle_getblocks(peer, locator, hash_stop)
            }
            NetworkMessage::GetHeaders { locator, hash_stop } => {
                self.handle_getheaders(peer, locator, hash_stop)
            }
            NetworkMessage::Headers(_) => Vec::new(),
            NetworkMessage::Tx(tx) => self.handle_tx(peer, tx),
            NetworkMessage::Block(block) => self.handle_block(peer, block),
            NetworkMessage::Mempool => self.handle_mempool_request(peer),
            NetworkMessage::Ping(nonce) => vec![(peer, NetworkMessage::Pong(nonce))],
            NetworkMessage::Pong(_) => Vec::new(),
            NetworkMessage::Alert(_) => {
                // Alert verification keys are retired; drop silently.
                Vec::new()
            }
            NetworkMessage::GetAddr => vec![(peer, NetworkMessage::Addr(Vec::new()))],
        }
    }

    fn handle_version(&self, peer: PeerId, version: i32, start_height: i32) -> Outbound {
        {
            let mut peers = self.peers.lock().expect("peer lock");
            let state = peers.entry(peer).or_default();
            state.version = version;
            state.start_height = start_height;
        }
        let mut out = vec![(peer, NetworkMessage::Verack)];
        let chain = self.chain();
        if chain.best_height() < start_height {
            out.push((
                peer,
                NetworkMessage::GetBlocks {
                    locator: chain.block_locator(),
                    hash_stop: [0u8; 32],
                },
            ));
        }
        out
    }

    fn handle_inv(&self, peer: PeerId, items: Vec<Inv>) -> Outbound {
        if items.len() > MAX_INV_SZ {
            self.misbehaving(peer, 20);
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut wanted = Vec::new();
        let chain = self.chain();
        let mempool = self.mempool();
        let orphans = self.orphan_blocks.lock().expect("orphan lock");
        for inv in items {
            let already_have = match inv.kind {
                InvKind::Tx => {
                    mempool.contains(&inv.hash)
                        || mempool.has_orphan(&inv.hash)
                        || chain.contains_tx(&inv.hash).unwrap_or(false)
                }
                InvKind::Block => chain.contains_block(&inv.hash) || orphans.contains(&inv.hash),
            };
            if !already_have {
                wanted.push(inv);
            } else if inv.kind == InvKind::Block && orphans.contains(&inv.hash) {
                // We hold the advertised block as an orphan; chase its
                // missing ancestry instead of re-downloading it.
                out.push((
                    peer,
                    NetworkMessage::GetBlocks {
                        locator: chain.block_locator(),
                        hash_stop: orphans.root_of(&inv.hash),
                    },
                ));
            }
        }
        if !wanted.is_empty() {
            out.push((peer, NetworkMessage::GetData(wanted)));
        }
        out
    }

    fn handle_getdata(&self, peer: PeerId, items: Vec<Inv>) -> Outbound {
        if items.len() > MAX_INV_SZ {
            self.misbehaving(peer, 20);
            return Vec::new();
        }
        let mut out = Vec::new();
        let chain = self.chain();
        let mempool = self.mempool();
        for inv in items {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match inv.kind {
                InvKind::Block => {
                    if let Some(id) = chain.arena().lookup(&inv.hash) {
                        match chain.read_block(id) {
                            Ok(block) => out.push((peer, NetworkMessage::Block(block))),
                            Err(err) => log_warn!("getdata: reading block failed: {err}"),
                        }
                        let continue_hit = {
                            let mut peers = self.peers.lock().expect("peer lock");
                            let state = peers.entry(peer).or_default();
                            if state.hash_continue == Some(inv.hash) {
                                state.hash_continue = None;
                                true
                            } else {
                                false
                            }
                        };
                        if continue_hit {
                            // Nudge the peer to request the next batch.
                            out.push((
                                peer,
                                NetworkMessage::Inv(vec![Inv {
                                    kind: InvKind::Block,
                                    hash: chain.best_hash(),
                                }]),
                            ));
                        }
                    }
                }
                InvKind::Tx => {
                    if let Some(tx) = mempool.get(&inv.hash) {
                        out.push((peer, NetworkMessage::Tx(tx.clone())));
                    }
                }
            }
        }
        out
    }

    fn handle_getblocks(&self, peer: PeerId, locator: Vec<Hash256>, hash_stop: Hash256) -> Outbound {
        const LIMIT: usize = 500;
        let chain = self.chain();
        let start = chain.locate_best_chain_block(&locator);
        let hashes = chain.best_chain_after(start, LIMIT + 1);

        let mut inventory = Vec::new();
        for hash in &hashes {
            if *hash == hash_stop {
                break;
            }
            if inventory.len() == LIMIT {
                // The peer will getdata the last one and the continue inv
                // triggers the next batch.
                let mut peers = self.peers.lock().expect("peer lock");
                peers.entry(peer).or_default().hash_continue =
                    inventory.last().map(|inv: &Inv| inv.hash);
                break;
            }
            inventory.push(Inv {
                kind: InvKind::Block,
                hash: *hash,
            });
        }
        if inventory.is_empty() {
            return Vec::new();
        }
        vec![(peer, NetworkMessage::Inv(inventory))]
    }

    fn handle_getheaders(
        &self,
        peer: PeerId,
        locator: Vec<Hash256>,
        hash_stop: Hash256,
    ) -> Outbound {
        const LIMIT: usize = 2000;
        let chain = self.chain();
        let mut headers = Vec::new();

        if locator.is_empty() {
            if let Some(id) = chain.arena().lookup(&hash_stop) {
                headers.push(chain.arena().node(id).header());
            }
        } else {
            let start = chain.locate_best_chain_block(&locator);
            for hash in chain.best_chain_after(start, LIMIT) {
                let id = chain.arena().lookup(&hash).expect("best chain hash");
                headers.push(chain.arena().node(id).header());
                if hash == hash_stop {
                    break;
                }
            }
        }
        vec![(peer, NetworkMessage::Headers(headers))]
    }

    fn handle_tx(&self, peer: PeerId, tx: Transaction) -> Outbound {
        let mut out = Vec::new();
        let mut chain = self.chain();
        chain.set_adjusted_time(self.now());
        let mut mempool = self.mempool();
        let now = self.now();

        match mempool.accept(&chain, tx.clone(), true, false, now) {
            Ok(txid) => {
                chain.events().publish(ChainEvent::TxAccepted { txid });
                self.relay_tx(peer, &tx, &mut out);

                // Accepting a parent can free queued orphans; drain the
                // dependency closure breadth-first.
                let mut work_queue = vec![txid];
                let mut cursor = 0usize;
                while cursor < work_queue.len() {
                    let parent = work_queue[cursor];
                    cursor += 1;
                    for orphan_hash in mempool.orphans_for_parent(&parent) {
                        let Some(raw) = mempool.orphan_raw(&orphan_hash).map(|raw| raw.to_vec())
                        else {
                            continue;
                        };
                        let Ok(orphan_tx) = encoding::decode::<Transaction>(&raw) else {
                            mempool.erase_orphan(&orphan_hash);
                            continue;
                        };
                        match mempool.accept(&chain, orphan_tx.clone(), true, false, now) {
                            Ok(orphan_txid) => {
                                log_info!(
                                    "accepted orphan tx {}",
                                    hash_fragment(&orphan_txid)
                                );
                                chain
                                    .events()
                                    .publish(ChainEvent::TxAccepted { txid: orphan_txid });
                                self.relay_tx(peer, &orphan_tx, &mut out);
                                work_queue.push(orphan_txid);
                                mempool.erase_orphan(&orphan_hash);
                            }
                            Err(err) if err.kind == MempoolErrorKind::MissingInputs => {}
                            Err(_) => mempool.erase_orphan(&orphan_hash),
                        }
                    }
                }
            }
            Err(err) if err.kind == MempoolErrorKind::MissingInputs => {
                mempool.add_orphan(&tx);
                let evicted = mempool.limit_orphans(Mempool::default_orphan_cap());
                if evicted > 0 {
                    log_debug!("orphan tx overflow: removed {evicted}");
                }
            }
            Err(err) => {
                self.score_mempool_error(peer, &err);
                log_debug!("tx rejected: {err}");
            }
        }
        out
    }

    fn relay_tx(&self, from: PeerId, tx: &Transaction, out: &mut Outbound) {
        let inv = Inv {
            kind: InvKind::Tx,
            hash: tx.txid(),
        };
        for other in self.other_peers(from) {
            out.push((other, NetworkMessage::Inv(vec![inv])));
        }
    }

    fn score_mempool_error(&self, peer: PeerId, err: &MempoolError) {
        if err.dos > 0 {
            self.misbehaving(peer, err.dos);
        }
    }

    fn handle_block(&self, peer: PeerId, block: Block) -> Outbound {
        let hash = block.hash();
        let mut out = Vec::new();
        let mut chain = self.chain();
        chain.set_adjusted_time(self.now());

        {
            let orphans = self.orphan_blocks.lock().expect("orphan lock");
            if orphans.contains(&hash) {
                log_debug!("already have block (orphan) {}", hash_fragment(&hash));
                return out;
            }
        }

        match chain.process_block(&block) {
            Ok(sync) => {
                self.apply_sync(&chain, sync);
                self.relay_block(peer, hash, &mut out);

                // Connecting a parent may free orphans; keep accepting
                // until no new children surface.
                let mut work_queue = vec![hash];
                let mut cursor = 0usize;
                while cursor < work_queue.len() {
                    let parent = work_queue[cursor];
                    cursor += 1;
                    let children = {
                        let mut orphans = self.orphan_blocks.lock().expect("orphan lock");
                        orphans.take_children(&parent)
                    };
                    for child in children {
                        let child_hash = child.hash();
                        match chain.accept_block(&child) {
                            Ok(sync) => {
                                self.apply_sync(&chain, sync);
                                self.relay_block(peer, child_hash, &mut out);
                                work_queue.push(child_hash);
                            }
                            Err(err) => {
                                log_debug!(
                                    "orphan block {} rejected: {err}",
                                    hash_fragment(&child_hash)
                                );
                            }
                        }
                    }
                }
                log_info!("processed block {}", hash_fragment(&hash));
            }
            Err(ChainStateError::Rule(err)) => match err.kind {
                RejectKind::MissingParent => {
                    // Retain the block and ask the provider to fill in the
                    // gap up to its deepest missing ancestor.
                    let root = {
                        let mut orphans = self.orphan_blocks.lock().expect("orphan lock");
                        orphans.insert(block);
                        orphans.root_of(&hash)
                    };
                    out.push((
                        peer,
                        NetworkMessage::GetBlocks {
                            locator: chain.block_locator(),
                            hash_stop: root,
                        },
                    ));
                }
                RejectKind::Duplicate => {
                    log_debug!("already have block {}", hash_fragment(&hash));
                }
                _ => {
                    if err.dos > 0 {
                        self.misbehaving(peer, err.dos);
                    }
                    log_warn!("block {} rejected: {err}", hash_fragment(&hash));
                }
            },
            Err(err) => {
                log_warn!("block processing failed: {err}");
            }
        }
        out
    }

    fn relay_block(&self, from: PeerId, hash: Hash256, out: &mut Outbound) {
        let inv = Inv {
            kind: InvKind::Block,
            hash,
        };
        for other in self.other_peers(from) {
            out.push((other, NetworkMessage::Inv(vec![inv])));
        }
    }

    /// Reconcile the mempool after a best-chain change: resurrect what the
    /// abandoned branch carried (tolerating failures) and drop what the new
    /// branch confirmed.
    fn apply_sync(&self, chain: &ChainState<S>, sync: MempoolSync) {
        let mut mempool = self.mempool();
        let now = self.now();
        for tx in sync.resurrect {
            let txid = tx.txid();
            if let Err(err) = mempool.accept(chain, tx, false, false, now) {
                log_debug!("resurrection failed for {}: {err}", hash_fragment(&txid));
                if err.kind != MempoolErrorKind::AlreadyKnown {
                    // A transaction that cannot return to the pool is gone
                    // for good; let subscribers drop it from their views.
                    chain.events().publish(ChainEvent::TxInvalidated { txid });
                }
            }
        }
        for tx in sync.remove {
            let txid = tx.txid();
            mempool.remove(&txid);
            mempool.erase_orphan(&txid);
        }
    }

    fn handle_mempool_request(&self, peer: PeerId) -> Outbound {
        let mempool = self.mempool();
        let inventory: Vec<Inv> = mempool
            .txids()
            .into_iter()
            .take(MAX_INV_SZ)
            .map(|hash| Inv {
                kind: InvKind::Tx,
                hash,
            })
            .collect();
        if inventory.is_empty() {
            return Vec::new();
        }
        vec![(peer, NetworkMessage::Inv(inventory))]
    }
}
