use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;
use xcoind_consensus::Hash256;

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = sha256(data);
    let digest = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Short hex rendering of a hash for log lines, big-endian like the
/// canonical display order.
pub fn hash_fragment(hash: &Hash256) -> String {
    let mut out = String::with_capacity(20);
    for byte in hash.iter().rev().take(10) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
