//! Node-side plumbing over the consensus core: the memory pool, the peer
//! message dispatcher, and the mining worker pool.

pub mod mempool;
pub mod miner;
pub mod net;
