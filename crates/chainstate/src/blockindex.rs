//! The in-memory block tree and its on-disk representation.
//!
//! Index nodes live in an append-only arena and are addressed by stable
//! integer handles; `prev` links form the tree and `next_on_best` links are
//! maintained only along the current best chain. Nodes are created on first
//! valid receipt of a block and never removed, so handles stay valid for
//! the life of the process.

use std::collections::HashMap;

use primitive_types::U256;
use xcoind_consensus::Hash256;
use xcoind_primitives::block::BlockHeader;
use xcoind_primitives::encoding::{DecodeError, Decoder, Encoder};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub u32);

#[derive(Clone, Debug)]
pub struct BlockIndexNode {
    pub hash: Hash256,
    pub prev: Option<NodeId>,
    /// Forward link; `Some` only while this node sits on the best chain.
    pub next_on_best: Option<NodeId>,
    pub height: i32,
    /// Cumulative expected hash count up to and including this block.
    pub chain_work: U256,
    pub file: u32,
    pub block_pos: u32,
    pub version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockIndexNode {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_block: self.prev_hash,
            merkle_root: self.merkle_root,
            time: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }
}

#[derive(Default)]
pub struct BlockIndexArena {
    nodes: Vec<BlockIndexNode>,
    by_hash: HashMap<Hash256, NodeId>,
}

impl BlockIndexArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn node(&self, id: NodeId) -> &BlockIndexNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut BlockIndexNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Insert a node; returns the existing handle when the hash is already
    /// present (indices are never replaced).
    pub fn insert(&mut self, node: BlockIndexNode) -> NodeId {
        if let Some(existing) = self.by_hash.get(&node.hash) {
            return *existing;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.by_hash.insert(node.hash, id);
        self.nodes.push(node);
        id
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Walk `prev` links `steps` times.
    pub fn ancestor(&self, mut id: NodeId, steps: usize) -> Option<NodeId> {
        for _ in 0..steps {
            id = self.node(id).prev?;
        }
        Some(id)
    }

    /// Last common ancestor of two nodes.
    pub fn find_fork(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let mut fork = a;
        let mut longer = b;
        loop {
            while self.node(longer).height > self.node(fork).height {
                longer = self.node(longer).prev?;
            }
            if fork == longer {
                return Some(fork);
            }
            fork = self.node(fork).prev?;
        }
    }

    /// Median of the previous `window` timestamps ending at `id`.
    pub fn median_time_past(&self, id: NodeId, window: usize) -> i64 {
        let mut times = Vec::with_capacity(window);
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            if times.len() == window {
                break;
            }
            let node = self.node(node_id);
            times.push(node.time as i64);
            cursor = node.prev;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }
}

/// Persisted form of an index node, keyed by block hash. The forward link
/// is stored so the best chain can be re-walked after a restart.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskBlockIndex {
    pub version: i32,
    pub prev_hash: Hash256,
    pub next_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: i32,
    pub file: u32,
    pub block_pos: u32,
    pub chain_work: [u8; 32],
}

impl DiskBlockIndex {
    pub fn from_node(node: &BlockIndexNode, next_hash: Hash256) -> Self {
        Self {
            version: node.version,
            prev_hash: node.prev_hash,
            next_hash,
            merkle_root: node.merkle_root,
            time: node.time,
            bits: node.bits,
            nonce: node.nonce,
            height: node.height,
            file: node.file,
            block_pos: node.block_pos,
            chain_work: node.chain_work.to_little_endian(),
        }
    }

    pub fn chain_work_value(&self) -> U256 {
        U256::from_little_endian(&self.chain_work)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(152);
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_hash);
        encoder.write_hash_le(&self.next_hash);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.write_i32_le(self.height);
        encoder.write_u32_le(self.file);
        encoder.write_u32_le(self.block_pos);
        encoder.write_hash_le(&self.chain_work);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let entry = Self {
            version: decoder.read_i32_le()?,
            prev_hash: decoder.read_hash_le()?,
            next_hash: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
            height: decoder.read_i32_le()?,
            file: decoder.read_u32_le()?,
            block_pos: decoder.read_u32_le()?,
            chain_work: decoder.read_hash_le()?,
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hash_tag: u8, height: i32, prev: Option<NodeId>) -> BlockIndexNode {
        BlockIndexNode {
            hash: [hash_tag; 32],
            prev,
            next_on_best: None,
            height,
            chain_work: U256::from(height as u64 + 1),
            file: 1,
            block_pos: 8,
            version: 2,
            prev_hash: prev.map(|_| [hash_tag - 1; 32]).unwrap_or([0u8; 32]),
            merkle_root: [0u8; 32],
            time: 1_000_000 + height as u32,
            bits: 0x207fffff,
            nonce: 0,
        }
    }

    #[test]
    fn insert_is_idempotent_by_hash() {
        let mut arena = BlockIndexArena::new();
        let a = arena.insert(node(1, 0, None));
        let b = arena.insert(node(1, 0, None));
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn find_fork_on_branching_tree() {
        let mut arena = BlockIndexArena::new();
        let genesis = arena.insert(node(1, 0, None));
        let a1 = arena.insert(node(2, 1, Some(genesis)));
        let a2 = arena.insert(node(3, 2, Some(a1)));
        let b1 = arena.insert(node(4, 1, Some(genesis)));
        let b2 = arena.insert(node(5, 2, Some(b1)));
        let b3 = arena.insert(node(6, 3, Some(b2)));

        assert_eq!(arena.find_fork(a2, b3), Some(genesis));
        assert_eq!(arena.find_fork(a2, a1), Some(a1));
        assert_eq!(arena.find_fork(b3, b3), Some(b3));
    }

    #[test]
    fn median_time_past_is_middle_of_window() {
        let mut arena = BlockIndexArena::new();
        let mut prev = None;
        let mut last = None;
        for height in 0..11 {
            let mut entry = node(10 + height as u8, height, prev);
            entry.hash = [10 + height as u8; 32];
            let id = arena.insert(entry);
            prev = Some(id);
            last = Some(id);
        }
        let mtp = arena.median_time_past(last.expect("tip"), 11);
        assert_eq!(mtp, 1_000_005);
    }

    #[test]
    fn disk_entry_round_trip() {
        let entry = DiskBlockIndex {
            version: 2,
            prev_hash: [1u8; 32],
            next_hash: [2u8; 32],
            merkle_root: [3u8; 32],
            time: 4,
            bits: 5,
            nonce: 6,
            height: 7,
            file: 8,
            block_pos: 9,
            chain_work: [10u8; 32],
        };
        let bytes = entry.encode();
        assert_eq!(DiskBlockIndex::decode(&bytes).expect("decode"), entry);
    }
}
