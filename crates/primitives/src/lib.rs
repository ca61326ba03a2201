//! Wire primitives: consensus serialization, hashing, transactions, blocks.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod merkle;
pub mod outpoint;
pub mod script;
pub mod transaction;
