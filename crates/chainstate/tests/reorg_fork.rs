use std::sync::Arc;

use xcoind_chainstate::flatfiles::BlockFileStore;
use xcoind_chainstate::state::{AcceptAllSignatures, ChainState};
use xcoind_consensus::money::Amount;
use xcoind_consensus::params::initial_distribution_schedule;
use xcoind_consensus::{chain_params, ChainParams, Network};
use xcoind_pow::difficulty::{compact_to_target, hash_meets_target};
use xcoind_primitives::address::{address_to_destination, destination_script};
use xcoind_primitives::block::{Block, BlockHeader};
use xcoind_primitives::merkle::merkle_root;
use xcoind_primitives::outpoint::OutPoint;
use xcoind_primitives::script::push_int;
use xcoind_primitives::transaction::{Transaction, TxIn, TxOut};
use xcoind_storage::memory::MemoryStore;

const TITHE: Amount = 15_916_928_403;

fn setup() -> (ChainState<MemoryStore>, tempfile::TempDir) {
    let params: ChainParams = chain_params(Network::Regtest);
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
    (chain, dir)
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
    chain: &ChainState<MemoryStore>,
    prev: [u8; 32],
    height: i32,
    mut transactions: Vec<Transaction>,
    miner_tag: u8,
) -> Block {
    transactions.insert(0, coinbase(height, miner_tag));
    let txids: Vec<[u8; 32]> = transactions.iter().map(Transaction::txid).collect();
    let (root, _) = merkle_root(&txids);
    let header = solve(BlockHeader {
        version: 2,
        prev_block: prev,
        merkle_root: root,
        time: chain.params().consensus.genesis_time + height as u32 * 120,
        bits: chain.params().consensus.genesis_bits,
        nonce: 0,
    });
    Block {
        header,
        transactions,
    }
}

/// Extend the best chain with empty blocks up to `height`, returning the
/// first block (whose coinbase the spend tests consume).
fn mine_base_chain(chain: &mut ChainState<MemoryStore>, height: i32) -> Block {
    let mut prev = chain.best_hash();
    let mut first = None;
    for h in 1..=height {
        let block = build_block(chain, prev, h, Vec::new(), 0x41);
        prev = block.hash();
        chain.process_block(&block).expect("base chain block");
        if h == 1 {
            first = Some(block);
        }
    }
    first.expect("at least one block")
}

#[test]
fn higher_work_branch_triggers_reorg() {
    let (mut chain, _dir) = setup();
    let genesis_hash = chain.best_hash();

    // Best chain: G -> A1 -> A2.
    let a1 = build_block(&chain, genesis_hash, 1, Vec::new(), 0xa1);
    chain.process_block(&a1).expect("a1");
    let a2 = build_block(&chain, a1.hash(), 2, Vec::new(), 0xa1);
    chain.process_block(&a2).expect("a2");
    assert_eq!(chain.best_hash(), a2.hash());

    // Competing branch: G -> B1 -> B2 -> B3, more total work.
    let b1 = build_block(&chain, genesis_hash, 1, Vec::new(), 0xb1);
    chain.process_block(&b1).expect("b1 stored without pivot");
    let b2 = build_block(&chain, b1.hash(), 2, Vec::new(), 0xb1);
    chain.process_block(&b2).expect("b2 stored without pivot");
    assert_eq!(chain.best_hash(), a2.hash());

    let b3 = build_block(&chain, b2.hash(), 3, Vec::new(), 0xb1);
    chain.process_block(&b3).expect("pivot to b3");

    assert_eq!(chain.best_height(), 3);
    assert_eq!(chain.best_hash(), b3.hash());

    // The abandoned branch is demoted: no forward links off the A nodes,
    // and genesis now points into the B branch.
    let genesis = chain.arena().lookup(&genesis_hash).expect("genesis");
    let a1_id = chain.arena().lookup(&a1.hash()).expect("a1");
    let b1_id = chain.arena().lookup(&b1.hash()).expect("b1");
    assert_eq!(chain.arena().node(genesis).next_on_best, Some(b1_id));
    assert_eq!(chain.arena().node(a1_id).next_on_best, None);
    assert!(chain.is_on_best_chain(b1_id));
    assert!(!chain.is_on_best_chain(a1_id));
}

#[test]
fn reorg_resurrects_disconnected_transactions_and_restores_tx_index() {
    let (mut chain, _dir) = setup();

    let block1 = mine_base_chain(&mut chain, 101);
    let base_tip = chain.best_hash();
    let funding_txid = block1.transactions[0].txid();

    // Spend the (now mature) height-1 coinbase on branch A at height 102.
    let spend = Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 1),
            script_sig: vec![0x01, 0x51],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 900_000,
            script_pubkey: miner_script(0x77),
        }],
        lock_time: 0,
        ref_height: 102,
    };
    let spend_txid = spend.txid();

    let a102 = build_block(&chain, base_tip, 102, vec![spend.clone()], 0xa1);
    chain.process_block(&a102).expect("a102");
    assert_eq!(chain.best_height(), 102);

    // Connected: the funding coinbase's slot 1 is marked spent and the
    // spender is indexed.
    let funding_entry = chain
        .tx_index_entry(&funding_txid)
        .expect("read")
        .expect("funding indexed");
    assert!(funding_entry.spent[1].is_some());
    assert!(funding_entry.spent[0].is_none());
    assert!(chain.contains_tx(&spend_txid).expect("read"));

    // Competing branch B overtakes from the fork at 101.
    let b102 = build_block(&chain, base_tip, 102, Vec::new(), 0xb2);
    chain.process_block(&b102).expect("b102 stored without pivot");
    let b103 = build_block(&chain, b102.hash(), 103, Vec::new(), 0xb2);
    let sync = chain.process_block(&b103).expect("pivot");

    assert_eq!(chain.best_height(), 103);
    assert_eq!(chain.best_hash(), b103.hash());

    // The non-coinbase transaction from the abandoned branch comes back
    // for mempool resurrection; coinbases never do.
    assert!(sync.resurrect.iter().any(|tx| tx.txid() == spend_txid));
    assert!(sync
        .resurrect
        .iter()
        .all(|tx| !tx.is_coinbase()));
    // Everything connected on the new branch is queued for removal.
    assert!(sync
        .remove
        .iter()
        .any(|tx| tx.txid() == b103.transactions[0].txid()));

    // Disconnect restored the funding entry's spent vector and dropped the
    // spender from the index: connect followed by disconnect is identity.
    let funding_entry = chain
        .tx_index_entry(&funding_txid)
        .expect("read")
        .expect("funding still indexed");
    assert!(funding_entry.spent.iter().all(Option::is_none));
    assert!(!chain.contains_tx(&spend_txid).expect("read"));

    // Forward links pivoted at the fork point.
    let fork = chain.arena().lookup(&base_tip).expect("fork");
    let b102_id = chain.arena().lookup(&b102.hash()).expect("b102");
    let a102_id = chain.arena().lookup(&a102.hash()).expect("a102");
    assert_eq!(chain.arena().node(fork).next_on_best, Some(b102_id));
    assert_eq!(chain.arena().node(a102_id).next_on_best, None);
}

#[test]
fn double_spend_across_blocks_rejected() {
    let (mut chain, _dir) = setup();
    let block1 = mine_base_chain(&mut chain, 101);
    let funding_txid = block1.transactions[0].txid();

    let spend = |tag: u8| Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 1),
            script_sig: vec![0x01, 0x51],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 900_000,
            script_pubkey: miner_script(tag),
        }],
        lock_time: 0,
        ref_height: 102,
    };

    let a102 = build_block(&chain, chain.best_hash(), 102, vec![spend(0x71)], 0xa1);
    chain.process_block(&a102).expect("a102");

    // A second spend of the same outpoint on the same branch must fail.
    let mut conflict = spend(0x72);
    conflict.ref_height = 103;
    let a103 = build_block(&chain, a102.hash(), 103, vec![conflict], 0xa1);
    let err = chain.process_block(&a103).expect_err("double spend");
    assert!(err.to_string().contains("already used"));
    assert_eq!(chain.best_height(), 102);
}

#[test]
fn immature_coinbase_spend_rejected() {
    let (mut chain, _dir) = setup();
    let block1 = mine_base_chain(&mut chain, 50);
    let funding_txid = block1.transactions[0].txid();

    let early_spend = Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 1),
            script_sig: vec![0x01, 0x51],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 900_000,
            script_pubkey: miner_script(0x71),
        }],
        lock_time: 0,
        ref_height: 51,
    };
    let block = build_block(&chain, chain.best_hash(), 51, vec![early_spend], 0xa1);
    let err = chain.process_block(&block).expect_err("immature spend");
    assert!(err.to_string().contains("coinbase at depth"));
}

#[test]
fn spender_ref_height_cannot_precede_input() {
    let (mut chain, _dir) = setup();
    let block1 = mine_base_chain(&mut chain, 101);
    let funding_txid = block1.transactions[0].txid();

    // The height-1 coinbase is denominated at height 1; claiming an
    // earlier reference height would un-decay its value.
    let rewind = Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 1),
            script_sig: vec![0x01, 0x51],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 900_000,
            script_pubkey: miner_script(0x71),
        }],
        lock_time: 0,
        ref_height: 0,
    };
    let block = build_block(&chain, chain.best_hash(), 102, vec![rewind], 0xa1);
    let err = chain.process_block(&block).expect_err("ref height rewind");
    assert!(err.to_string().contains("ref height"));
}
