//! Consensus parameter definitions.

use crate::money::Amount;
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: i32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    /// Genesis hash; all-zero on regtest, where the genesis block is built
    /// at runtime and its hash is whatever falls out.
    pub hash_genesis_block: Hash256,
    pub genesis_time: u32,
    pub genesis_bits: u32,
    pub genesis_nonce: u32,
    /// Proof-of-work limit as a little-endian 256-bit target.
    pub pow_limit: Hash256,
    /// Seconds between blocks the retarget aims for.
    pub pow_target_spacing: i64,
    /// Retarget interval before the filter threshold.
    pub original_interval: i64,
    /// Retarget interval once the FIR filter is active.
    pub filtered_interval: i64,
    /// Height at which difficulty switches to the FIR-filtered mode.
    pub diff_filter_threshold: i32,
    /// One-time compact target returned for the block at the filter
    /// transition, undoing the last pre-filter adjustment.
    pub filter_transition_bits: Option<u32>,
    /// Testnet rule: blocks arriving after twice the target spacing may use
    /// the work limit.
    pub allow_min_difficulty_blocks: bool,
    /// Demurrage denominator `R`; value decays by `(R-1)/R` per block.
    pub demurrage_rate: i64,
    /// Mandated per-block payment to the distribution schedule, in base units.
    pub tithe_amount: Amount,
    /// Initial-distribution subsidy at height zero, in base units.
    pub initial_subsidy: Amount,
    /// Height at which the initial-distribution ramp reaches zero.
    pub eq_height: i32,
    pub majority_enforce_block_upgrade: u32,
    pub majority_reject_block_outdated: u32,
    pub majority_window: u32,
    pub bip16_switch_time: u32,
    /// Historical blocks exempt from the duplicate-txid (BIP30) rule.
    pub bip30_exceptions: [(i32, Hash256); 2],
    pub checkpoints: Vec<Checkpoint>,
}

impl ConsensusParams {
    /// Height of the deepest hard-coded checkpoint.
    pub fn total_blocks_estimate(&self) -> i32 {
        self.checkpoints
            .last()
            .map(|checkpoint| checkpoint.height)
            .unwrap_or(0)
    }

    pub fn checkpoint_for_height(&self, height: i32) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height == height)
    }

    pub fn original_target_timespan(&self) -> i64 {
        self.original_interval * self.pow_target_spacing
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    /// Record magic for peer messages and the block files.
    pub message_start: [u8; 4],
    pub pubkey_prefix: u8,
    pub script_prefix: u8,
    pub default_port: u16,
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

/// Parse a big-endian hex hash (optionally `0x`-prefixed) into the
/// little-endian in-memory representation.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() || hex.len() > 64 || hex.len() % 2 == 1 {
        return Err(HexError::InvalidLength);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&padded[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            consensus: mainnet_consensus_params(),
            message_start: [0x2c, 0xfe, 0x7e, 0x6d],
            pubkey_prefix: 0x00,
            script_prefix: 0x05,
            default_port: 8639,
        },
        Network::Testnet => ChainParams {
            network,
            consensus: testnet_consensus_params(),
            message_start: [0x5e, 0xd6, 0x7c, 0xf3],
            pubkey_prefix: 0x6f,
            script_prefix: 0xc4,
            default_port: 18639,
        },
        Network::Regtest => ChainParams {
            network,
            consensus: regtest_consensus_params(),
            message_start: [0xfa, 0xbf, 0xb5, 0xda],
            pubkey_prefix: 0x6f,
            script_prefix: 0xc4,
            default_port: 18744,
        },
    }
}

/// `~uint256(0) >> shift` as little-endian bytes.
fn pow_limit_from_shift(shift: usize) -> Hash256 {
    let mut limit = [0xffu8; 32];
    let zero_bytes = shift / 8;
    let rem = shift % 8;
    for byte in limit.iter_mut().rev().take(zero_bytes) {
        *byte = 0;
    }
    if rem != 0 {
        limit[31 - zero_bytes] = 0xff >> rem;
    }
    limit
}

const DEMURRAGE_RATE: i64 = 1 << 20;
const TITHE_AMOUNT: Amount = 15_916_928_403;
const INITIAL_SUBSIDY: Amount = 49_603_174_604;
const EQ_HEIGHT: i32 = 161_280;

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        hash_genesis_block: hash256_from_hex(
            "000000005b1e3d23ecfd2dd4a6e1a35238aa0392c0a8528c40df52376d7efe2c",
        )
        .expect("mainnet genesis hash"),
        genesis_time: 1_498_852_900,
        genesis_bits: 0x1d00ffff,
        genesis_nonce: 278_229_610,
        pow_limit: pow_limit_from_shift(32),
        pow_target_spacing: 120,
        original_interval: 2016,
        filtered_interval: 9,
        diff_filter_threshold: 28_336,
        filter_transition_bits: Some(0x1b01c13a),
        allow_min_difficulty_blocks: false,
        demurrage_rate: DEMURRAGE_RATE,
        tithe_amount: TITHE_AMOUNT,
        initial_subsidy: INITIAL_SUBSIDY,
        eq_height: EQ_HEIGHT,
        majority_enforce_block_upgrade: 750,
        majority_reject_block_outdated: 950,
        majority_window: 1000,
        bip16_switch_time: crate::constants::BIP16_SWITCH_TIME,
        bip30_exceptions: bip30_exception_blocks(),
        checkpoints: vec![Checkpoint {
            height: 0,
            hash: hash256_from_hex(
                "000000005b1e3d23ecfd2dd4a6e1a35238aa0392c0a8528c40df52376d7efe2c",
            )
            .expect("mainnet genesis hash"),
        }],
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        hash_genesis_block: hash256_from_hex(
            "00000000a52504ffe3420a43bd385ef24f81838921a903460b235d95f37cd65e",
        )
        .expect("testnet genesis hash"),
        genesis_time: 1_498_852_900,
        genesis_bits: 0x1d00ffff,
        genesis_nonce: 3_098_244_593,
        pow_limit: pow_limit_from_shift(32),
        pow_target_spacing: 120,
        original_interval: 2016,
        filtered_interval: 9,
        diff_filter_threshold: 2_016,
        filter_transition_bits: None,
        allow_min_difficulty_blocks: true,
        demurrage_rate: DEMURRAGE_RATE,
        tithe_amount: TITHE_AMOUNT,
        initial_subsidy: INITIAL_SUBSIDY,
        eq_height: EQ_HEIGHT,
        majority_enforce_block_upgrade: 51,
        majority_reject_block_outdated: 75,
        majority_window: 100,
        bip16_switch_time: crate::constants::BIP16_SWITCH_TIME,
        bip30_exceptions: bip30_exception_blocks(),
        checkpoints: vec![Checkpoint {
            height: 0,
            hash: hash256_from_hex(
                "00000000a52504ffe3420a43bd385ef24f81838921a903460b235d95f37cd65e",
            )
            .expect("testnet genesis hash"),
        }],
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        hash_genesis_block: [0u8; 32],
        genesis_time: 1_498_852_900,
        genesis_bits: 0x207fffff,
        genesis_nonce: 0,
        pow_limit: pow_limit_from_shift(1),
        pow_target_spacing: 120,
        original_interval: 2016,
        filtered_interval: 9,
        diff_filter_threshold: i32::MAX,
        filter_transition_bits: None,
        allow_min_difficulty_blocks: true,
        demurrage_rate: DEMURRAGE_RATE,
        tithe_amount: TITHE_AMOUNT,
        initial_subsidy: INITIAL_SUBSIDY,
        // One schedule entry per block: keeps the budget machinery live in
        // integration tests without three years of chain.
        eq_height: 320,
        majority_enforce_block_upgrade: 51,
        majority_reject_block_outdated: 75,
        majority_window: 100,
        bip16_switch_time: crate::constants::BIP16_SWITCH_TIME,
        bip30_exceptions: bip30_exception_blocks(),
        checkpoints: Vec::new(),
    }
}

fn bip30_exception_blocks() -> [(i32, Hash256); 2] {
    [
        (
            91_842,
            hash256_from_hex("00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec")
                .expect("bip30 exception hash"),
        ),
        (
            91_880,
            hash256_from_hex("00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721")
                .expect("bip30 exception hash"),
        ),
    ]
}

/// The mandated initial-distribution payees, one entry per
/// `eq_height / 320` blocks. The schedule is consensus data: block
/// validation rejects any block whose coinbase fails to fund the entry for
/// its height. Testnet renders the same key hashes under its address
/// version byte, so the decoded destinations are network-independent.
pub fn initial_distribution_schedule() -> &'static [&'static str; 320] {
    &INITIAL_DISTRIBUTION_SCHEDULE
}

/// Schedule slot for a block height; callers guarantee `height < eq_height`.
pub fn schedule_index(height: i32, eq_height: i32) -> usize {
    debug_assert!(height >= 0 && height < eq_height);
    (height as i64 * 320 / eq_height as i64) as usize
}

static INITIAL_DISTRIBUTION_SCHEDULE: [&str; 320] = [
        "1DCyWRmTXB9goqA4Zb88nU1Q8snA7d7n4x",
        "1LoFvV5YJsSMkpyPLizqyWH8KAkevV2XwJ",
        "1JTUD2rB3FvbNFPw7cvCdTVDM9nuZTw7Jk",
        "18w4xQQj2iXwtq9smYkEAJrWVz4jQNU4xd",
        "16vdGLyxdYgSCT9xAng9Js7KrsnrUHsyG2",
        "1Lo8mmskrLnvCuthadVaRS4K7WUSFpWAwj",
        "1J1irQQ3ZWoTPct989Nnzdtu6WjfCjQcWs",
        "1MME2u4V2ZiU6uUVJXTZMg5sQXAyMBUNXt",
        "1CT3kUDi3rvma8R7Jwbz7puATSU3xzfLHz",
        "1CLupi58K9XHVeWZ8jwbWiY4Ns46mPALbe",
        "16A8XoWWvtJrDE1AdYQoLxAQcoLQML9gjz",
        "1NwgZoUnudfmbQ99xDRdvrYskgjQ7KBt1Z",
        "17CDPam7M59JM6vK5xzh1vUGKjYT9Byi5S",
        "1PyKZKfquWcu3PFzKbvmKZ2oJWXbmbsWdB",
        "186LbdeaDsn4Y5zrLN9cfSHWpQPSHtLbgC",
        "1MrQWWNKfVseYyGkyyLsDhFekJWGJNt2i9",
        "1EAUtv6YfvcRUrU5SncdZ27aSJ6SBNJH67",
        "1DuSbRKB1GL9cBeJLYsuh3DADdwJgvHAQN",
        "1MPdcnGXHsjR6rFSBUMm4ui44q8Ra1fYRT",
        "1Ntv6bDFj8eQnXjawcatnJjJTowo1BA8rF",
        "14j9vnqn6FZwPZmwdvGSuESm1m3oQsHP5y",
        "1C679HkKyki9rN8tJvtMNyXGLedPdo8zbb",
        "1EMKZYHTcnpHVUJx4dUp5Jne2ePQKjpdTm",
        "1PmgFAV835znVpUwGkLkvJrKc4ZzBqixNX",
        "16zKbgjQDqua6xjrXLhCbPGFrpr8UJxf4x",
        "1KPurbuUH5D6HRe3Y148kUbRjDyFCCm3VH",
        "1GVyWAXxP9tgZbj8iDSQqQ5tcN36uJ3F1s",
        "1E5udyBXuBt1e8c2R27AvSTdp8H7LEhmxr",
        "1hQcLTTD7KiFxiojvSrrrj8Y1w2gF5bHE",
        "17BJ1oZdZJS64curVAL6rN1yYN7YiNVXpR",
        "1LotiV7qGfAZhVV36XtrixnEfHCiuqe39e",
        "1Q5yedqC3adLpNjbY4CWMxPojoxnSCVGjw",
        "1FpBGhBWn7WDZr9nP47qG3DktJbaY7P48P",
        "1H6Nh8dRPZjMm3KViuW5ZESjRwqYnQ36nt",
        "1NAAKtpk7VRRUtA5ja8YxCZQaisXQ28HqA",
        "1JKxed9uYfvcPgjGdo1GQXwMQJkAnap34G",
        "1DZ58aSGD13QfUa118rtvfKrJiVPAoxdV8",
        "12wnNuaQHbLyThJVJvfePhV8UwQEWURLLP",
        "16f8S6f6ZDX3N1JG2DL5kyz9KCzmwpGgt7",
        "1PPKwAUZ6g5wWiopfyJKJZn3xUFcrJbSBF",
        "18DzCPRpU1Y2o5FsuuvcScZaYSi2ZBTVFr",
        "1E5fy7csgbN5G9ENRwvSwGSAibLdLk52pe",
        "1Dapd3WLAz1jm91FpNThHamXeMjDU4TJgJ",
        "15HQuReQzSQ1mrHWy3iYELyJLjGNe9gNEZ",
        "1DcJhNQJLkDrSmrvATciEaf95ZvnhFFUF7",
        "1ErNVYRnGQpzFmxkXYnqR4LbcCViby7Rfi",
        "1D1CmGn3BCM5rviTxZEfc7NhozAetePkit",
        "1Af3dbEWMK5VuMkUozepYPQgMeVtmKtvW9",
        "1JY2W5m4jsYzY2YYXU6RRKDmobE3BYEbgA",
        "1PdTBBm2xhCoUY4A6cfYCopaFDsFyTf4MY",
        "1Fe51wUzrhyGmag9UXmzEsr6jSyWqcATAM",
        "1kyb1A5jWYP49YTkoN2y3JFQuNp1S2gXa",
        "1FxZ7fmDQmauMASYVuVcHeajGZQKrQ1UWB",
        "1EwtDpNLPmUZNLFmGMmNTwviUVe3DuTFKt",
        "1NYRPya8KWUfiSr8fXxccPoDMmBw2Uqj1y",
        "16vQMSBZK7iy5HDFfeiP2WomfpGfSEPJx5",
        "12E9bCLYb9uzh2MHhpsyR89V3eLXZp5afr",
        "1EA4NJjMXSgVNsNgEc7nSyRf3epjp3ABrQ",
        "1NN442B74LAsXUMUFZSriWZCUh8b5ECFR9",
        "1EMaEQmjjDCjgu3auEam5ABQ1J9ZtdLdpV",
        "1RYXoGz2cHTGsYC5zZdDwpCdGRj4aBdAX",
        "19aDWt7kBf53uLANiWnLFnWo5CqASh79mi",
        "1LDEniSxXknXLHT1BMWpFsBM3PQcgn1nYz",
        "1Q4Lji94eWCC9xBzwrbRE9yTMYS5fdKg9z",
        "16fQVYur5CVMq9VfNLYypKXNeTmvWnDKsz",
        "1Mc3r8pCpuRiHhkD3DrWf89CUnZb6xbFbg",
        "18oEnf5iR9CD2HFDc9Yr8kD7m5CrJVWRkv",
        "12VDq99L8UQWr8Waqo4GreEGCEBnkxMaXy",
        "1H7PxhMmvqiRT8NDEkSFjfDekRLQ65CqBN",
        "17yC59RcpYsw7jX3Zw7c48AcWtJqaHUwAr",
        "1AFT16ksWdqdjhk56gFDaRnr7vS4XCVtyQ",
        "1G84MZVqN54QTD47YWWmimy9htaj1WC58U",
        "13YcisL6YyUG5nqegyqyrL6pVtrMqGYtcq",
        "1NYdmagVHfbqTgW4hYJKS2YnWrJzCnSsvZ",
        "1PumqgHPLUjPKfddgwJA46D5GBdYgT8myg",
        "1PFKxU6g1kQayDwvpiLX2vJgUghMqJz9Ck",
        "154ENKy3HuYoN8xARVaxp61NUAt5GEknDj",
        "12CJ8BD8L8tQXjrpy4UfjJwCCtoL6vsegD",
        "1LXCWYJ6k7EG2Bi8rLh2jhV94L4G768yTa",
        "1K1rbcUFmE7XScTsqiNEiJHyX69eqbZdDB",
        "1uZZzXiu8n7eL96rcFWh9MvcqerYxaGce",
        "1JidqtE1YHwXFC1utxPAp17RkM3rUqwULk",
        "1PuMwPqNLLYi1sPxvJToid2EsfiP4xPfo6",
        "14ZSJRvSdgYFA1xUM2txnQKdMXMfsEWvuJ",
        "1D9RJw7p5zgz4JeWvVzYxBsAkvucRMiXfG",
        "1JRpRLZgcfNNeVEwGQmYZw5nv7Aq3KVx5x",
        "17Rqyx39YnpFN23dPE3CWRPC8JhuBVKktx",
        "19pozj4JeWd6rpMDeTpx8d1Dv4rebhUkvT",
        "15jULtTPTzXHr9ezTMFbaPJojbuYFrbrQp",
        "19dfCSTERPh5j4XtYoJatjdjD9afReeY3s",
        "1LgzNc1Sfbu8BaxKUESGbNzCNnpqvhpCi4",
        "1HTvoZUUNncPkjjv17xHLEtncdrgcdnN46",
        "1NHvSZWwk8RtgPvfhzykpvebQnVk1Q5XxX",
        "1AzdeDfjz5C5yT6wVxurgS8QPkZviHvY8N",
        "1BdFwnfS84uDeZn4sojUs5ZC8fSkx9o2XG",
        "1AgCAgvQZPQTkdMg853SkM2WdRzN4Q2ATw",
        "1JABYERsgkAYincsgCpic7MwV63iM19iXp",
        "1JFudqZDUkBMdV4ShLmhxLD7sfNEYdBQCE",
        "1Pqf48Skyxt77RNVwTLxUhA2BNCscaHJKa",
        "1AtdTwFFYZJrUUSWbBLBCkodRcnqwb1a6G",
        "14iezrH1nR9TjGtnywFPqBHbwYcEhwz8y9",
        "16x2aavFb2AHKntUnzA3HC2wmi921YJn4i",
        "1HovjtiToM6f2xV3Sxg4fxfvSYPCGGEXLe",
        "1MNrqZyo7poywLPVap6PsmmT5CS4f8hyWq",
        "1F6PzQRW2MPfCYvzgeUXoBXaEikH3E5zMk",
        "1F2SpgUakBvx6aNgJiCtEZHnTqVWeQcoMk",
        "13iTRwxSLGC17fzumSrRidaXe8v8awdDux",
        "1KuyBiZBdXVq8oNGAPWEqWiFi2RyH8rvwd",
        "1HdXmhHKkkzpn1UKmhBWFzQMYsUqxUuVZ9",
        "1Dw9jXoWc5MsEH3uLB9pi98qeyijUrvWU3",
        "15mW5WsusPo6LAAYLqa6ngFfQ1jX51v3Bn",
        "1DFfarcjskvSi2w56msV4JeeVZqtuwEL9p",
        "12SeGWd2txi4fdQKoFXsTdd2fgjDbABWyb",
        "1MoENmjtakS8XTHcwsbVFeJkjEckMhS3xm",
        "167pv4Hn53XQ4hFhyNtEyP36n8HrL3NU3j",
        "1E6WgpC4bmYJagvsTzhRxZ1Z8sRSsQjmJX",
        "1EFkVCzezsZCq56JWSBRf3Dy6tafFRxh4N",
        "1KnKZwDb44Qf3Lutda2T85uFZiTZwe2v2C",
        "1CLpF2fLukzBHard43mXLEXxz11gFK5dc9",
        "1DXSfPi1Tj6tQ5qf5M6Yj6cpNmLfPKMwr1",
        "16nHP74UsqeHewM1yUhNCL3zCjkWnqFt8g",
        "1FeqXkG9jGEDcPaKJV8rdh4NbqTjbdvN4a",
        "1LwwjmsoDtQ1Zh9N8doGMczP1TJnes2YoZ",
        "1DgusdNgB6nRD2emfwURMmk33LrB7Wp95c",
        "17kjPofVVmhZAWXnrVwfqizGtXWBufWwbf",
        "1EnLHA3U15wXehXAC24W587EEaeyUcaA6K",
        "1MwpkFtEwrAQNbsmbt4kB9WtoB8mFLXZ44",
        "12iQRcVoRCbFNvoQARM3rufTkd7jXpHZEm",
        "19zK2WFDkaHZfWa4uS5mzF2XD1KrZEMxy2",
        "12Zs8LtRY1cTS3HKw1gwPzYjB1Ar6Er93R",
        "1KDVcQhjZuX39Fvv8QbrSpaSycMA4YdPkU",
        "1AT6rxNBT8sasYKrKm9fv7LdjXBS89Wewh",
        "19YjbLEUgqV8joQMgijDWZoY1inwXf1hXc",
        "1EpHQ43BkzmKYMiYwmRRKEXQidpgA499px",
        "13bQP93mmUFtUGVuBEwZ9ymdbCC9yywgdL",
        "1GatPyGkCX5YUW4f2QHJk1PzwspCRz9b3J",
        "1Jk8sCUfHVE6VpwkkTG9qaYYS9u1zMmQAs",
        "13N4Eiv2KiX4PeFwiWnC847JBv4TP2sn1Z",
        "1ESzED9saJ3bVB6BbVSTFGDxRLnTgWRVDC",
        "1CspvzG7HyuNXRLsaWnpsLXPDwkeDKd4mm",
        "14Rs4fo9tK39kyEFoAjbvkcgGZ6k356t3T",
        "1D6jgPJYoFhbY7gJjNMAbyfJzBGVtqSc1o",
        "16MHoaVyYQgPU525fz2auJpK6JVyFKEiz1",
        "1FfS9TQswYZHYDNkUmncRAYjYJkLzGncp5",
        "14PXPSEjNjWAuqYa63RBT6gewnomE9saRu",
        "1CHBBtBCRQz1TFyE12g8RbGPZ6UzX2AieC",
        "1CMwT1jzfoe9VvURpZanaXVQobMQLr13W8",
        "1696KNrMvHvnthPLZnGuYGY96UbEqLeXz6",
        "1A7TQi9sMiNQX8uwwqFb8eqaXnpTJY4WYg",
        "1GNuX6AN2KCF1AWtxAT9QYD6QRJubRvKaz",
        "16L3CvHeZcZcr3wPhoEC3ZsMLN7YTonMTQ",
        "1EnqRdqx1VZyfc5ia4pcmZstBcGdW8FGxn",
        "1MQ1QeCMZhxFCgReGEPRS2Qy74FaPqFccW",
        "16Za6Rn8dCmM8gctXQtwN1yQ2WXnhHsSgs",
        "15k38dy86CRnirMY9Q1niVmfn7nfXTmppL",
        "1MQsruCXBjCZzTZKKpPwcC74ztetbtAw4E",
        "1cmAt63c4ZAqRe2fBQTYs5Jyx41fiBbhQ",
        "1PBCaowV7gQM6Lj1NfSpH2TnHHmqXcYTsC",
        "1841uXFc2kUTUogCDJwp4U1NPjSPqsg69x",
        "1XNo9kDMM6uqvf9yCWmqj17rukC8abjtb",
        "1A4kHAe6rNz1q8G6dYjNMyWzgVv4DxYget",
        "18Y6y6zcJrG5j2RjmGqsUvtWkZhnTvRka7",
        "1DkcMkHWUUVjXgAu2MFXVkUuwZ6JWv64cz",
        "1JvXTyBxhjE9mERWEFnqeuAPgbJSi25qGd",
        "1FHus2MsM8k4oKHt22YFYeoFkf65kxQFP3",
        "18HLkAhrzeNsaMB3MY1xUGW7wkzjWGobT7",
        "1AF7KmTRrS3mMxop2Viop1MctrNJmPAHQt",
        "13g4rWjU2PK4eN9D9XXo4jRB84RiJ2hD7o",
        "1EWUiUoxZXfTbZXDZGueag7XRnv5Mej8ZZ",
        "1LuuGk4tyd4USQqtYypemjt5vs3VRqV1QU",
        "15eUUDUYDuiKnt9xNbzhNFmorCK9F9mJb2",
        "1HGzWgdrNAKsE9nE1GHtUvaXHNzvwTyPQX",
        "11MhmCVmFszm6yTTwaK2dypwcLaybmCjp",
        "1s9XWpGPQqhbog1S6xgGqcVnfvnLMAueZ",
        "16f3tHcuRavx3tSWCM2jnnCX5jGa2vJe9Q",
        "15NWaghRx51ravYTUqsnBF2hQFQeSHtTvS",
        "1QGUUgikmqCinDQn3vfqx9q6mnT5ekA4BG",
        "134WvpvyZUveYc98CmtWZc1oBBXdrV1GuU",
        "1LqNfcDBn7eytc7Ln6fLrCDLkYeMa6R9dV",
        "14xbponjm6rXp8cNzTJmtCJwvwvDuKvaCD",
        "14D7JyUrv1HeSD7FCc8WupmbxUiGyfC7uC",
        "1ER6GhDJokhBjB73DWDTdC2BP2J9DiqD1o",
        "13Q3or3Hew7hBZzMoriz8LcMXwptqD5HEd",
        "1HSyeVQEvdRwj2rutFN33cKu2tPzyGkgx2",
        "1A1WaQQ6ZjXuEe2KYZNC3ycPg4X9czsR4D",
        "1fhzxkMPY4hUYNywoQwyVGkinVKQrPJ2P",
        "1Nf63BqwEmb7vU15bRfpvKEs5tMGZpR5Fi",
        "1Gi6tjnRBecQovhRQVNmsPyVZYmphZerdg",
        "1AJ87nhgSQkac9BUjEvbyWh8c95ciHLZWG",
        "1WDyJLrJaLRePMtea6bAgADwzdpbW5nqd",
        "1JTvhcJuxydevXw4ocUUteiPNWwPtMM56H",
        "16X1LYmpxM2fPBjNTLbnPo2LdA6sB7fbNu",
        "1315ZWhxgd6pqqTmvF21fxt5wzYvpcnZSm",
        "17PWpyrUmkaCVPu6KXaWvuLLYvD9YU61RP",
        "1PADxQpcx8Kvs3PprjYvM1wYFyjxB3tcs8",
        "1BWyJmxybx3p1guhud8qxabrGbVLWaVNaM",
        "17JpmLSEbXgmheAvTQ7iiBvR5TaSsM2Xgt",
        "19oxMuyyipVsvxXWKBBrFmY8hQbWkiiVEv",
        "16TvroBFWJmUN7VSHQLmyh6KiCri5QVTQu",
        "1MXJR6XRoThY9rwvyvLkXWN17WN7rAQC4J",
        "163N8CmDAf45CM6brXMpzg3AN2nkDXTuRt",
        "1CWudCKLCxT5AXteLFeZRBDyb4moQH4cVL",
        "1DYmgt2zpW2eNfyczC98aq76URHQMnfwZK",
        "1JnE2YseXgBX4oHGo8VywsxnNkp52s6nkX",
        "1D8WBBBCHhgLrMa8s3QU1bkRcRHEt8cNfv",
        "1Fm5eoDvEZo4hyW4YEDu3q2gKbpCuo9hqw",
        "18uRTixnVaKMz9tyoR6Ve6Rqdwtt8oZ1Zw",
        "1FuByKdd2RK3hjc3UFeV56HvheyAMnjMMS",
        "17nDqatJ7M6M9vFRa4BngCCLPGSJ6mfc8b",
        "1G4qHkiaaVZwuLqwvh2itFjR18iThkeaDQ",
        "18ZcHUg5wV4sSdd9pS7xv5rYsfx5D1hZWi",
        "1CZU6UCZjtWueXQWYzyrFa4K7pTSeBQ8cw",
        "19zRVJvXaXZvygqbHAP1ZKF5Rx9gq3Xh8u",
        "1HQAyw9UUi2eiQHJcnbg5eeJTnv2QoEQqA",
        "16eZAqdqypn47T8DwS1archd39uXqK8JQ8",
        "19he5Hy915MbSZBvwHjB3LAm5UyLnmQ5TK",
        "1CzGcY5JKDroUtdFdZJArGeEmKMEtyeAKw",
        "1DzowkZrtEQgoDF8xgxjPBfLaBMeBHjNr2",
        "16GA6zc9iTUB8o47oi7fbE88ayEi8C7w2r",
        "1Mvp5TikHrzJetDMbjHkzAkP9rMBfQrais",
        "1Lrbk1vrmCqVfajBqtwHD1x9x72jeDCon5",
        "1AMDHRKUah3J8yESFt7NnoUXrM4ULHcUpN",
        "1MbnTTv5FJX8RsK5tw9KjNx1VCvo94GEKK",
        "1Hmbm1TUDuDwdVWkU1oiaReRRBTzb8fMDJ",
        "15XYapuYSjaDc4uDXJsf3PF33YzSRs5P3M",
        "1C3ovhhZwo73isNQPuKKD5VDm2XwByBkTK",
        "16VJrBFjFjhLY93NihDvWqBpUeiXeL2FUi",
        "1C9Niuy1cSW6a6g5tm8GhPsSML6ZtWeUQS",
        "149937wZtsTvtwmixD33npnsnyUm5zjstX",
        "1NkCKjPZUFecVWxLGnJbN7Fp8viJRG5Xg4",
        "1MG3okwhF3YDwVWDcYsNr5ySA4eMtCATrK",
        "1GtzbwNuHYBZaDRVpJGuDwjBQhSh5RBVRZ",
        "1CJi6dja55AtGeuJX6WLFGTHsoofqZyDNu",
        "1oftVXkjfpJSMKGnz1pps1xVWNUNNhAmq",
        "168KgGGUEEx22eCNuSMjsKvn5chiZ5c217",
        "1FmQzGLJFu3AvucwDEAjYRM4fPgiSZsT6Q",
        "1F9t4EmWXy2Wui21LaMuZmRDwRCF38aDZN",
        "19eFuss1dgxPdDfoAu6AsVmBUj5d2DUPu3",
        "15Yr2PPbFGqbi2SZtZ59cvd5y2Es8atRE5",
        "1Pz8oisCda5aJXtVVDo1mfxxvgymVNcmsM",
        "1HkHQHNkjXp6VinoEG6a1i55NmreXC9yAX",
        "12ShPmbsADZMacnr5u2DPxssKXjd3HaCZc",
        "1BasQDDfZ677LF3mEAQUEFHvJexZ8ZxY47",
        "1FVXTVaK3rwSrx67WGdNkNFwL5sVm81TEK",
        "1NV8VjVBrkgCTJvyBHZumboXjPtSNZvRJX",
        "1HVdN1BSusJZ42sSfJFHB2CJ6LcW5Fz31a",
        "12j2yfUP2dNo3HwdrTDjMGZhzBcdhYvFj6",
        "1BrWHBKCpvNYssq8Kj8yY6qvy7GqFgk8UP",
        "1G3faUnBxMHwwX2uLn6dZJEj9pmJ2o5cnq",
        "1Nq59Py1u73B26aTTRhZG3g9h5fmrmkeX9",
        "1DMuz7B193myzVq4Kgg76Jb6Da2UjkAti",
        "1124BMmAevhic3H1MQB3teQFhoVi7RVUhR",
        "1B1hrgcDNfSuaKJi3oJ4cBtyysq2BpGFz8",
        "18NE1w2soK6xGUYYvoTe7oEtRtQhxBLXCq",
        "1MESy7CY2yTgxSERyejcvCGjK8Qm2EhE4g",
        "1445Hs1Lgh9pPvD8mSt5oiGwTY8yT2sy9R",
        "14pm2Fxwin4mwHqd5ujXAXTJJFuQ31qYUf",
        "17UhQpeFQ3nCjj8PJKCrTWHnP8YSvrNM7h",
        "15zVu5t8iURV2feuvmnHgYp9u7cxPC4XrN",
        "19JriYALeNskNnvjYidpoNHNLegftkViqH",
        "13mauBB6JYTPcfoWbNbCWKk4sNqmwxCXse",
        "1LwRt9rpGaekbht7UAitg2ADmFtDrKThYV",
        "15Z9wnxM6VxrRkqhLZpLskGRJ2dLRMEmCg",
        "1GvQwfMSMRggmmFCRqf1EmvaG5U5sY4sKL",
        "13iUoiiVq7C4fUmy94r1HEDf35YKwBAVXh",
        "1ELZsnzgBmZSSxQQYuAANg8izDFTbzhbPB",
        "13me2Z71XAtmkzggnqusdvuRiXZzFRGZBj",
        "1KC7ECvdcofiYXJ63iUnvFrEH4zzhQZ2pB",
        "1LtFLa3oaEBhmHQ5iXRvFqeNcrzU8GPNMM",
        "1LNHH8DGXWQRyfmkSkaJcBkkiVxUhH8tBM",
        "1Daw5kGzsqBhfRfMV6dAA4bgBZ2LBWS1nY",
        "164XLENwRiappRPUP47sRTSyXtW8CAXVLi",
        "1CFoTaknkFGADVo2rK92jwq18NWBzVcJGS",
        "1MnrNuPrnuJFxYnkpKDqUymHGjb1d6qLVq",
        "1BpwPwf8kUssmoMCoWnHCVY4wjBJi3CZyD",
        "1jiJb2DU3DB6ujD8eV3DZXmnfwWaHti4y",
        "1DqQnvWdtKvwBtePpCbDd8juZ9ZbeaKFdH",
        "131D32PNpqqGtLGUaAaZePqpUdBTiy8Akh",
        "16jK6KaY7Ub7fZ7YaBi94ZsygovzixnRNx",
        "1EJx1ShX4UJVrzynP3oZw8wdLpSGC1KPrz",
        "1899kFmma5FongtN9JfvFKqhwtbw2w9MDe",
        "1FNNBK9SeDUufbbnmoagUFt7oKVbb65vaw",
        "1LxF4pLjeSpNs4ux24MDduzCzrM2KCsE7M",
        "1BZjVRe2CCA7G7qnG3beWWhG173f1mbNX2",
        "1L5HWs7WrK457CzjAgnHghveFpQVv7rRTe",
        "1Kp4bjG9nwbogd8WM62ijGG6onW9Wo4aYK",
        "1hhvJ4QmB6RX12Bps9xhnMHCDDXTXAnDu",
        "19xiuTYSm85gNsPZw8hGLS69e2DjVbCuAP",
        "19WdcJU8Z1W3ZZnbpfDRbdrYGapxp1L5zo",
        "121hT7w8DN3x1pYEowak7FjmNgihMNo2cd",
        "1BtthjPb9GPKwgcJtrgZRQRWhiRSCHmyvk",
        "1JKgRTkMgEodFFpPwoz9W6pejMN3x3J9X1",
        "18zp4dHdouYqFn2qC4ttAva8cwqhZ4pm4K",
        "1ELAVZKvGykuzRDCvFUsJTL4istYisbxpK",
        "1PfULZdJniM8SutFdjoKvG3WLUwxZL2YUf",
        "1DTbnuz4dPLdduseE3k5xr62eFAYjCSk3E",
        "14jVGdWJRcqpdgWPAbbvhMfVnLha6MdnYU",
        "1GBiMVjsqkcGxij2hGFQxVUX2WjDcr1Esf",
        "1FGUuAuGRkSqEL8Besg33QsekxmBB75ZUH",
        "19FsZeejdbfUKK21wENRdoR2BUowD4FsMZ",
        "1LbBHWffmANdhcb1Wciv4jWwXPGrtVFhsU",
        "1FT9PRuDmFKxZorYrfgibWaaBdKWv7PiB4",
        "1FUvPJ3nXMUrFEWqkjxPe5esqQ2GoCmUAk",
        "1LJLBDK8q7yLibK2oYTA6hbD9UpmP6U3QP",
        "14E9GEg9T5N9aja1FV2ewNFjMK6wPEgsKb",
        "1JYmABbYkUjAyowLwa1zoQj86PEWMBdeZP",
        "1NCfTbrEsZrCT3Efyk5AfvqP2xY6NesWHy",
        "1Bwd6rcgGLq8sdo3FHHSmh3J7ufqdgMeqi",
        "1PzAWHEt2xabgWEki5hTgwtTyuKRS1at39",
        "1Fo3r7DWDtJ8Yu2UqngNqKMSw98XgsXehW",
        "1H1b6FLd5eqH8Q9Cw8UkZv2nY3xxKTfsH3",
        "12x9TqiF9FQU7sqnRiCmrRZmG7dLs9hyG6",
        "13VYYQ8K9AFiajev9QdHM6Kj8SqevRT7GS",
        "149HFz2K7D4GffQm8t7rKQuWmcwJohsimk",
        "1JqwkYTg3ZuWMpjhxrJYgW7E826HYoiBSG",
        "1NiyjCKxM33nozwzU2LNtWBPWrWTUpiaAM",
        "1LD4F5tA87e7nMwNRuHhgwH6zTFZ1LyoE2",
        "1M3wUX9YYrcVSSw6Tncdoic3Fj13okQ63u",
        "1PVKsqeVqM4B2ccq915GHeK3aDeruStr24",
        "1PKNQqSuPknZ1PaqKkRqa9qYujWKL9KQ7E",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_round_trip_is_little_endian() {
        let hash = hash256_from_hex(
            "000000005b1e3d23ecfd2dd4a6e1a35238aa0392c0a8528c40df52376d7efe2c",
        )
        .expect("hash");
        assert_eq!(hash[31], 0x00);
        assert_eq!(hash[0], 0x2c);
    }

    #[test]
    fn pow_limit_shift_32() {
        let limit = pow_limit_from_shift(32);
        assert_eq!(&limit[28..], &[0, 0, 0, 0]);
        assert_eq!(limit[27], 0xff);
    }

    #[test]
    fn pow_limit_shift_1() {
        let limit = pow_limit_from_shift(1);
        assert_eq!(limit[31], 0x7f);
        assert_eq!(limit[30], 0xff);
    }

    #[test]
    fn schedule_covers_every_height() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(schedule_index(0, params.eq_height), 0);
        assert_eq!(schedule_index(503, params.eq_height), 0);
        assert_eq!(schedule_index(504, params.eq_height), 1);
        assert_eq!(schedule_index(params.eq_height - 1, params.eq_height), 319);
    }

    #[test]
    fn schedule_has_320_distinct_entries() {
        let schedule = initial_distribution_schedule();
        let mut sorted: Vec<_> = schedule.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 320);
    }
}
