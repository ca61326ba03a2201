//! Genesis block construction.
//!
//! The genesis coinbase is reproduced byte for byte: its merkle root and
//! the network genesis hashes are consensus constants, so every push and
//! every output value below is load-bearing.

use xcoind_consensus::params::hash256_from_hex;
use xcoind_consensus::ConsensusParams;
use xcoind_primitives::block::{Block, BlockHeader};
use xcoind_primitives::merkle::merkle_root;
use xcoind_primitives::outpoint::OutPoint;
use xcoind_primitives::script::{
    push_data, push_int, OP_CHECKSIG, OP_DROP, OP_DUP, OP_EQUALVERIFY, OP_HASH160,
};
use xcoind_primitives::transaction::{Transaction, TxIn, TxOut};

const GENESIS_TIMESTAMP: &[u8] = b"Trump is the USA President";

const GENESIS_PUBKEY: &str = "04678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5f";

const MESSAGE_2: &[u8] = b"Metals were an implicitly abusive agreement.\n\
Modern \"paper\" is a flawed tool, its engineering is a nest of leeches.\n\
The old money is obsolete.\n\
Let the individual monetize its credit without cartel intermediaries.\n\
Give us a rent-less cash so we can be free for the first time.\n\
Let this be the awaited dawn.";

const MESSAGE_3: &[u8] = b"\"Let us calculate, without further ado, in order to see who is right.\" --Gottfried Wilhelm Leibniz\n\
\xce\xbe\xc2\xb4\xef\xbd\xa5\xe2\x88\x80\xef\xbd\xa5`\xef\xbc\x89\xe3\x80\x80\xe3\x80\x80\xe3\x80\x80\xe3\x80\x80  n\n\
\xef\xbf\xa3\xe3\x80\x80\xe3\x80\x80\xe3\x80\x80  \xef\xbc\xbc\xe3\x80\x80\xe3\x80\x80  \xef\xbc\x88 E\xef\xbc\x89 good job, maaku!\n\
\xef\xbe\x8c\xe3\x80\x80\xe3\x80\x80\xe3\x80\x80  /\xe3\x83\xbd \xe3\x83\xbd_\xef\xbc\x8f\xef\xbc\x8f";

const MESSAGE_4: &[u8] = b"Ich w\xc3\xbcnsche Xcoin viel Erfolg zum Nutzen der 99 Prozent!";

const MESSAGE_5: &[u8] = b"\"The value of a man should be seen in what he gives and not in what he is able to receive.\" --Albert Einstein";

const MESSAGE_6: &[u8] = b"\"An army of principles can penetrate where an army of soldiers cannot.\" --Thomas Paine";

fn hex_bytes(hex: &str) -> Vec<u8> {
    debug_assert!(hex.len() % 2 == 0);
    (0..hex.len() / 2)
        .map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).expect("genesis hex"))
        .collect()
}

fn p2pkh_script(hash_hex: &str) -> Vec<u8> {
    let hash = hex_bytes(hash_hex);
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    push_data(&mut script, &hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

fn message_script(padding_hex: &str, message: &[u8], hash_hex: &str) -> Vec<u8> {
    let mut script = Vec::new();
    push_data(&mut script, &hex_bytes(padding_hex));
    script.push(OP_DROP);
    push_data(&mut script, message);
    script.push(OP_DROP);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    push_data(&mut script, &hex_bytes(hash_hex));
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

fn genesis_coinbase() -> Transaction {
    let mut script_sig = push_int(486_604_799);
    // CBigNum(4) serializes as a single byte.
    push_data(&mut script_sig, &[0x04]);
    push_data(&mut script_sig, GENESIS_TIMESTAMP);

    let mut pay_to_genesis_key = Vec::with_capacity(67);
    push_data(&mut pay_to_genesis_key, &hex_bytes(GENESIS_PUBKEY));
    pay_to_genesis_key.push(OP_CHECKSIG);

    let mut proof_of_burn = Vec::new();
    let commitment =
        hash256_from_hex("000000000000042d1bc432a92c42c186297799da1a7b878d79edc5e080d12950")
            .expect("genesis commitment");
    push_data(&mut proof_of_burn, &commitment);
    proof_of_burn.push(OP_DROP);
    proof_of_burn.push(0x00);

    Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        vout: vec![
            TxOut {
                value: 25_453_671_561,
                script_pubkey: pay_to_genesis_key,
            },
            TxOut {
                value: 1,
                script_pubkey: proof_of_burn,
            },
            TxOut {
                value: 1,
                script_pubkey: message_script(
                    "202020",
                    MESSAGE_2,
                    "0ef0f9d19a653023554146a866238b8822bc84df",
                ),
            },
            TxOut {
                value: 1,
                script_pubkey: message_script(
                    "2020202020202020",
                    MESSAGE_3,
                    "c26be5ec809aa4bf6b30aa89823cff7cedc3679a",
                ),
            },
            TxOut {
                value: 1,
                script_pubkey: message_script(
                    "202020202020",
                    MESSAGE_4,
                    "2939acd60037281a708eb11e4e9eda452c029eca",
                ),
            },
            TxOut {
                value: 1,
                script_pubkey: message_script(
                    "20202020202020202020202020",
                    MESSAGE_5,
                    "f9ca5caab4bda4dc28b5556aa79a2eec0447f0bf",
                ),
            },
            TxOut {
                value: 1,
                script_pubkey: message_script(
                    "202020202020202020202020",
                    MESSAGE_6,
                    "08f320cbb41a1ae25b794f6175f96080681989f3",
                ),
            },
            TxOut {
                value: 49_603_174_604,
                script_pubkey: p2pkh_script("85e54144c4020a65fa0a8fdbac8bba75dbc2fd00"),
            },
        ],
        lock_time: 0,
        ref_height: 0,
    }
}

/// Build the genesis block for a network. Main and test nets differ only in
/// the nonce; regtest reuses the same coinbase under its trivial target.
pub fn genesis_block(params: &ConsensusParams) -> Block {
    let coinbase = genesis_coinbase();
    let (root, _) = merkle_root(&[coinbase.txid()]);
    Block {
        header: BlockHeader {
            version: 1,
            prev_block: [0u8; 32],
            merkle_root: root,
            time: params.genesis_time,
            bits: params.genesis_bits,
            nonce: params.genesis_nonce,
        },
        transactions: vec![coinbase],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcoind_consensus::{consensus_params, Network};

    #[test]
    fn genesis_merkle_root_matches_constant() {
        let params = consensus_params(Network::Mainnet);
        let block = genesis_block(&params);
        let expected =
            hash256_from_hex("f53b1baa971ea40be88cf51288aabd700dfec96c486bf7155a53a4919af4c8bd")
                .expect("merkle constant");
        assert_eq!(block.header.merkle_root, expected);
    }

    #[test]
    fn mainnet_genesis_hash_matches_constant() {
        let params = consensus_params(Network::Mainnet);
        let block = genesis_block(&params);
        assert_eq!(block.hash(), params.hash_genesis_block);
    }

    #[test]
    fn testnet_genesis_hash_matches_constant() {
        let params = consensus_params(Network::Testnet);
        let block = genesis_block(&params);
        assert_eq!(block.hash(), params.hash_genesis_block);
    }

    #[test]
    fn genesis_coinbase_claims_floor_of_block_value() {
        let block = genesis_block(&consensus_params(Network::Mainnet));
        let total: i64 = block.transactions[0]
            .vout
            .iter()
            .map(|output| output.value)
            .sum();
        assert_eq!(total, 75_056_846_171);
    }

    #[test]
    fn genesis_passes_context_free_checks() {
        let params = consensus_params(Network::Mainnet);
        let block = genesis_block(&params);
        let adjusted_now = params.genesis_time as i64;
        crate::validation::check_block(&block, &params, adjusted_now, true, true)
            .expect("genesis valid");
    }
}
