//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: usize = 1_000_000;
/// Portion of a block a miner will fill when assembling a new block.
pub const MAX_BLOCK_SIZE_GEN: usize = MAX_BLOCK_SIZE / 2;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = (MAX_BLOCK_SIZE / 50) as u32;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Upper bound on the orphan transaction pool (each entry capped below).
pub const MAX_ORPHAN_TRANSACTIONS: usize = MAX_BLOCK_SIZE / 100;
/// Orphan transactions above this serialized size are dropped outright.
pub const MAX_ORPHAN_TX_SIZE: usize = 5_000;
/// Threshold below which `lock_time` is interpreted as a block height.
pub const LOCKTIME_THRESHOLD: i64 = 500_000_000;
/// The maximum number of entries in an `inv` or `getdata` message.
pub const MAX_INV_SZ: usize = 50_000;

/// Fee required per 1000 bytes for a transaction to be mined.
pub const MIN_TX_FEE: i64 = 50_000;
/// Fee required per 1000 bytes for a transaction to be relayed.
pub const MIN_RELAY_TX_FEE: i64 = 10_000;
/// Default `-limitfreerelay` value, in thousand-bytes-per-minute.
pub const DEFAULT_LIMIT_FREE_RELAY: i64 = 15;

/// BIP16 (pay-to-script-hash) switchover timestamp.
pub const BIP16_SWITCH_TIME: u32 = 1_333_238_400;

/// Current network protocol version for P2P messages.
pub const PROTOCOL_VERSION: i32 = 60_002;

/// Message magic used for `signmessage`/`verifymessage` style signatures.
///
/// Matches the legacy `strMessageMagic` constant; changing it forks message
/// signature validation off the network.
pub const SIGNED_MESSAGE_MAGIC: &str = "Xcoin Signed Message:\n";

/// DoS score thresholds used by the dispatcher when banning misbehaving peers.
pub const BAN_SCORE_THRESHOLD: u32 = 100;
