//! Merkle tree over transaction ids.

use xcoind_consensus::Hash256;

use crate::hash::sha256d;

/// Bitcoin-style merkle root: odd layers duplicate their last entry. The
/// `mutated` flag reports a terminal duplicate pair, which makes two
/// distinct transaction lists hash to the same root (CVE-2012-2459); block
/// validation rejects such blocks.
pub fn merkle_root(txids: &[Hash256]) -> (Hash256, bool) {
    if txids.is_empty() {
        return ([0u8; 32], false);
    }
    let mut layer = txids.to_vec();
    let mut mutated = false;
    while layer.len() > 1 {
        let size = layer.len();
        let mut next = Vec::with_capacity(size.div_ceil(2));
        let mut i = 0usize;
        while i < size {
            let i2 = if i + 1 < size { i + 1 } else { i };
            if i2 == i + 1 && i2 + 1 == size && layer[i] == layer[i2] {
                mutated = true;
            }
            let mut data = [0u8; 64];
            data[..32].copy_from_slice(&layer[i]);
            data[32..].copy_from_slice(&layer[i2]);
            next.push(sha256d(&data));
            i += 2;
        }
        layer = next;
    }
    (layer[0], mutated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> Hash256 {
        [byte; 32]
    }

    #[test]
    fn single_txid_is_its_own_root() {
        let (root, mutated) = merkle_root(&[hash(9)]);
        assert_eq!(root, hash(9));
        assert!(!mutated);
    }

    #[test]
    fn mutation_only_on_terminal_pair() {
        let (_, mutated) = merkle_root(&[hash(1), hash(1), hash(2), hash(3)]);
        assert!(!mutated);
        let (_, mutated) = merkle_root(&[hash(1), hash(2), hash(3), hash(3)]);
        assert!(mutated);
        let (_, mutated) = merkle_root(&[hash(1), hash(2), hash(3)]);
        assert!(!mutated);
    }

    #[test]
    fn odd_layer_duplicates_last() {
        let (root_three, _) = merkle_root(&[hash(1), hash(2), hash(3)]);
        let (root_padded, _) = merkle_root(&[hash(1), hash(2), hash(3), hash(3)]);
        assert_eq!(root_three, root_padded);
    }
}
