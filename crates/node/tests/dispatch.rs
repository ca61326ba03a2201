use std::sync::Arc;

use xcoind_chainstate::flatfiles::BlockFileStore;
use xcoind_chainstate::state::{AcceptAllSignatures, ChainState};
use xcoind_consensus::money::Amount;
use xcoind_consensus::params::initial_distribution_schedule;
use xcoind_consensus::{chain_params, Network};
use xcoind_node::mempool::MempoolErrorKind;
use xcoind_node::net::{InvKind, NetworkMessage, Node};
use xcoind_pow::difficulty::{compact_to_target, hash_meets_target};
use xcoind_primitives::address::{address_to_destination, destination_script};
use xcoind_primitives::block::{Block, BlockHeader};
use xcoind_primitives::merkle::merkle_root;
use xcoind_primitives::outpoint::OutPoint;
use xcoind_primitives::script::push_int;
use xcoind_primitives::transaction::{Transaction, TxIn, TxOut};
use xcoind_storage::memory::MemoryStore;

const TITHE: Amount = 15_916_928_403;

fn setup_node() -> (Node<MemoryStore>, tempfile::TempDir) {
    let params = chain_params(Network::Regtest);
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = BlockFileStore::new(dir.path(), params.message_start).expect("block files");
    let mut chain = ChainState::new(
        Arc::new(MemoryStore::new()),
        blocks,
        params.clone(),
        Arc::new(AcceptAllSignatures),
    );
    chain.set_adjusted_time(params.consensus.genesis_time as i64 + 100_000_000);
    chain.load_block_index(true).expect("load block index");
    (Node::new(chain), dir)
}

fn miner_script(tag: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn coinbase(height: i32, miner_tag: u8) -> Transaction {
    let mut script_sig = push_int(height as i64);
    if script_sig.len() < 2 {
        script_sig.push(0x00);
    }
    let address = initial_distribution_schedule()[height as usize];
    let destination = address_to_destination(address, Network::Mainnet).expect("schedule");
    Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        vout: vec![
            TxOut {
                value: TITHE,
                script_pubkey: destination_script(&destination),
            },
            TxOut {
                value: 1_000_000,
                script_pubkey: miner_script(miner_tag),
            },
        ],
        lock_time: 0,
        ref_height: height,
    }
}

fn solve(mut header: BlockHeader) -> BlockHeader {
    let target = compact_to_target(header.bits).expect("target");
    while !hash_meets_target(&header.hash(), &target) {
        header.nonce += 1;
    }
    header
}

fn build_block(
    node: &Node<MemoryStore>,
    prev: [u8; 32],
    height: i32,
    mut transactions: Vec<Transaction>,
) -> Block {
    transactions.insert(0, coinbase(height, 0x41));
    let txids: Vec<[u8; 32]> = transactions.iter().map(Transaction::txid).collect();
    let (root, _) = merkle_root(&txids);
    let (genesis_time, bits) = {
        let chain = node.chain();
        (
            chain.params().consensus.genesis_time,
            chain.params().consensus.genesis_bits,
        )
    };
    let header = solve(BlockHeader {
        version: 2,
        prev_block: prev,
        merkle_root: root,
        time: genesis_time + height as u32 * 120,
        bits,
        nonce: 0,
    });
    Block {
        header,
        transactions,
    }
}

/// Mine empty blocks through the dispatcher up to `height`; returns the
/// height-1 block.
fn mine_base_chain(node: &Node<MemoryStore>, peer: u64, height: i32) -> Block {
    let mut prev = node.chain().best_hash();
    let mut first = None;
    for h in 1..=height {
        let block = build_block(node, prev, h, Vec::new());
        prev = block.hash();
        node.process_message(peer, NetworkMessage::Block(block.clone()));
        if h == 1 {
            first = Some(block);
        }
    }
    assert_eq!(node.chain().best_height(), height);
    first.expect("at least one block")
}

fn spend_of(funding_txid: [u8; 32], value: Amount, tag: u8, ref_height: i32) -> Transaction {
    Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 1),
            script_sig: vec![0x01, 0x51],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey: miner_script(tag),
        }],
        lock_time: 0,
        ref_height,
    }
}

#[test]
fn orphan_block_promoted_when_parent_arrives() {
    let (node, _dir) = setup_node();
    let peer = 7u64;
    let genesis_hash = node.chain().best_hash();

    let b1 = build_block(&node, genesis_hash, 1, Vec::new());
    let b2 = build_block(&node, b1.hash(), 2, Vec::new());

    // Child first: parked as an orphan, ancestry requested from the peer.
    let out = node.process_message(peer, NetworkMessage::Block(b2.clone()));
    assert_eq!(node.orphan_block_count(), 1);
    assert_eq!(node.chain().best_height(), 0);
    assert!(out
        .iter()
        .any(|(to, msg)| *to == peer && matches!(msg, NetworkMessage::GetBlocks { .. })));

    // Parent arrives: both connect in the same dispatch.
    node.process_message(peer, NetworkMessage::Block(b1));
    assert_eq!(node.chain().best_height(), 2);
    assert_eq!(node.chain().best_hash(), b2.hash());
    assert_eq!(node.orphan_block_count(), 0);
}

#[test]
fn mempool_double_spend_rejected_without_evicting_first() {
    let (node, _dir) = setup_node();
    let peer = 1u64;
    let block1 = mine_base_chain(&node, peer, 101);
    let funding_txid = block1.transactions[0].txid();

    let tx_x = spend_of(funding_txid, 900_000, 0x51, 101);
    let txid_x = tx_x.txid();
    node.process_message(peer, NetworkMessage::Tx(tx_x));
    assert!(node.mempool().contains(&txid_x));
    assert_eq!(
        node.mempool()
            .spender_of(&OutPoint::new(funding_txid, 1)),
        Some((txid_x, 0))
    );

    // A conflicting spend of the same outpoint must not replace X.
    let tx_y = spend_of(funding_txid, 850_000, 0x52, 101);
    let txid_y = tx_y.txid();
    node.process_message(peer, NetworkMessage::Tx(tx_y.clone()));
    assert!(node.mempool().contains(&txid_x));
    assert!(!node.mempool().contains(&txid_y));

    // Direct acceptance reports the conflict.
    let err = {
        let chain = node.chain();
        let mut pool = node.mempool();
        pool.accept(&chain, tx_y, true, false, 0).unwrap_err()
    };
    assert_eq!(err.kind, MempoolErrorKind::ConflictingInput);
}

#[test]
fn orphan_tx_promoted_when_parent_accepted() {
    let (node, _dir) = setup_node();
    let peer = 1u64;
    let block1 = mine_base_chain(&node, peer, 101);
    let funding_txid = block1.transactions[0].txid();

    let parent = spend_of(funding_txid, 900_000, 0x61, 101);
    let parent_txid = parent.txid();
    let child = Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(parent_txid, 0),
            script_sig: vec![0x01, 0x51],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 800_000,
            script_pubkey: miner_script(0x62),
        }],
        lock_time: 0,
        ref_height: 101,
    };
    let child_txid = child.txid();

    // Child first: held as an orphan.
    node.process_message(peer, NetworkMessage::Tx(child));
    assert!(!node.mempool().contains(&child_txid));
    assert_eq!(node.mempool().orphan_count(), 1);

    // Parent frees it in the same dispatch.
    node.process_message(peer, NetworkMessage::Tx(parent));
    assert!(node.mempool().contains(&parent_txid));
    assert!(node.mempool().contains(&child_txid));
    assert_eq!(node.mempool().orphan_count(), 0);
}

#[test]
fn connected_block_clears_mempool_entries() {
    let (node, _dir) = setup_node();
    let peer = 1u64;
    let block1 = mine_base_chain(&node, peer, 101);
    let funding_txid = block1.transactions[0].txid();

    let tx = spend_of(funding_txid, 900_000, 0x51, 101);
    let txid = tx.txid();
    node.process_message(peer, NetworkMessage::Tx(tx.clone()));
    assert!(node.mempool().contains(&txid));

    let tip = node.chain().best_hash();
    let mut confirmed = tx;
    confirmed.ref_height = 101;
    let block = build_block(&node, tip, 102, vec![confirmed]);
    node.process_message(peer, NetworkMessage::Block(block));

    assert_eq!(node.chain().best_height(), 102);
    assert!(!node.mempool().contains(&txid));
}

#[test]
fn invalid_block_scores_provider() {
    let (node, _dir) = setup_node();
    let peer = 3u64;
    let genesis_hash = node.chain().best_hash();

    let mut block = build_block(&node, genesis_hash, 1, Vec::new());
    // Claim an easier target than the retarget demands.
    block.header.bits = 0x207ffffe;
    block.header = solve(block.header);

    node.process_message(peer, NetworkMessage::Block(block));
    let state = node.peer(peer).expect("peer state");
    assert_eq!(state.misbehavior, 100);
    assert!(state.banned);

    // A banned peer's messages are dropped.
    let out = node.process_message(peer, NetworkMessage::Ping(5));
    assert!(out.is_empty());
}

#[test]
fn version_handshake_and_ping() {
    let (node, _dir) = setup_node();
    let out = node.process_message(
        2,
        NetworkMessage::Version {
            version: 60_002,
            start_height: 50,
        },
    );
    assert!(out
        .iter()
        .any(|(_, msg)| matches!(msg, NetworkMessage::Verack)));
    // We are behind the peer: a getblocks request goes out.
    assert!(out
        .iter()
        .any(|(_, msg)| matches!(msg, NetworkMessage::GetBlocks { .. })));

    let out = node.process_message(2, NetworkMessage::Ping(99));
    assert!(matches!(out.as_slice(), [(2, NetworkMessage::Pong(99))]));
}

#[test]
fn getblocks_walks_forward_links() {
    let (node, _dir) = setup_node();
    let peer = 1u64;
    mine_base_chain(&node, peer, 5);
    let genesis_hash = {
        let chain = node.chain();
        let genesis = chain.arena().lookup(&chain.best_hash()).expect("tip");
        let mut cursor = genesis;
        while let Some(prev) = chain.arena().node(cursor).prev {
            cursor = prev;
        }
        chain.arena().node(cursor).hash
    };

    let out = node.process_message(
        peer,
        NetworkMessage::GetBlocks {
            locator: vec![genesis_hash],
            hash_stop: [0u8; 32],
        },
    );
    let inv = out
        .iter()
        .find_map(|(_, msg)| match msg {
            NetworkMessage::Inv(items) => Some(items.clone()),
            _ => None,
        })
        .expect("inventory response");
    assert_eq!(inv.len(), 5);
    assert!(inv.iter().all(|item| item.kind == InvKind::Block));
    assert_eq!(inv.last().expect("last").hash, node.chain().best_hash());
}
