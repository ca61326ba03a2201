//! Proof-of-work search over a fixed worker pool.
//!
//! Workers never touch the chain lock while hashing; the caller assembles
//! a candidate header, hands it out, and re-validates that the parent tip
//! is unchanged before publishing a solution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use xcoind_log::log_info;
use xcoind_pow::difficulty::{compact_to_target, hash_meets_target};
use xcoind_primitives::block::BlockHeader;

/// How many nonces a worker grinds between shutdown-flag polls.
const POLL_INTERVAL: u32 = 4096;

/// Search the nonce space of `header` with `workers` threads. Returns the
/// solved header, or `None` once the space is exhausted or shutdown is
/// requested.
pub fn search(header: BlockHeader, workers: usize, shutdown: &Arc<AtomicBool>) -> Option<BlockHeader> {
    let target = compact_to_target(header.bits).ok()?;
    let workers = workers.max(1);
    let (solution_tx, solution_rx) = bounded::<BlockHeader>(1);
    let found = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let mut candidate = header;
        let solution_tx = solution_tx.clone();
        let shutdown = Arc::clone(shutdown);
        let found = Arc::clone(&found);
        handles.push(thread::spawn(move || {
            let stride = workers as u32;
            let mut nonce = worker as u32;
            let mut since_poll = 0u32;
            loop {
                candidate.nonce = nonce;
                if hash_meets_target(&candidate.hash(), &target) {
                    if !found.swap(true, Ordering::SeqCst) {
                        let _ = solution_tx.try_send(candidate);
                    }
                    return;
                }

                since_poll += 1;
                if since_poll == POLL_INTERVAL {
                    since_poll = 0;
                    if shutdown.load(Ordering::Relaxed) || found.load(Ordering::Relaxed) {
                        return;
                    }
                }

                match nonce.checked_add(stride) {
                    Some(next) => nonce = next,
                    None => return,
                }
            }
        }));
    }
    drop(solution_tx);

    let solution = solution_rx.recv().ok();
    found.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }
    if let Some(header) = &solution {
        log_info!("proof-of-work found: nonce {}", header.nonce);
    }
    solution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn easy_header() -> BlockHeader {
        BlockHeader {
            version: 2,
            prev_block: [3u8; 32],
            merkle_root: [4u8; 32],
            time: 1_500_000_000,
            bits: 0x207fffff,
            nonce: 0,
        }
    }

    #[test]
    fn finds_solution_under_trivial_target() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let solved = search(easy_header(), 2, &shutdown).expect("solution");
        let target = compact_to_target(solved.bits).expect("target");
        assert!(hash_meets_target(&solved.hash(), &target));
    }

    #[test]
    fn shutdown_aborts_search() {
        let shutdown = Arc::new(AtomicBool::new(true));
        // An impossible target: only a shutdown poll can end the search.
        let mut header = easy_header();
        header.bits = 0x01000001;
        assert!(search(header, 1, &shutdown).is_none());
    }
}
