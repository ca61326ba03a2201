//! Transaction index entries: where a transaction lives on disk and which
//! of its outputs have been spent on the current branch.

use xcoind_primitives::encoding::{DecodeError, Decoder, Encoder};

const NULL_FILE: u32 = u32::MAX;

/// Position of a serialized transaction inside the block files.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskTxPos {
    pub file: u32,
    pub block_pos: u32,
    pub tx_pos: u32,
}

impl DiskTxPos {
    /// Sentinel meaning "the transaction lives in the memory pool, not on
    /// disk"; used when validating against unconfirmed parents.
    pub const MEMPOOL: DiskTxPos = DiskTxPos {
        file: 1,
        block_pos: 1,
        tx_pos: 1,
    };

    pub fn new(file: u32, block_pos: u32, tx_pos: u32) -> Self {
        Self {
            file,
            block_pos,
            tx_pos,
        }
    }

    pub fn is_mempool(&self) -> bool {
        *self == Self::MEMPOOL
    }

    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.file);
        encoder.write_u32_le(self.block_pos);
        encoder.write_u32_le(self.tx_pos);
    }

    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            file: decoder.read_u32_le()?,
            block_pos: decoder.read_u32_le()?,
            tx_pos: decoder.read_u32_le()?,
        })
    }
}

/// Per-transaction index record. `spent[i]` holds the position of the
/// transaction spending output `i`, or `None` while the output is
/// unspent. The vector length always equals the output count.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIndexEntry {
    pub pos: DiskTxPos,
    pub spent: Vec<Option<DiskTxPos>>,
}

impl TxIndexEntry {
    pub fn new(pos: DiskTxPos, output_count: usize) -> Self {
        Self {
            pos,
            spent: vec![None; output_count],
        }
    }

    pub fn fully_spent(&self) -> bool {
        self.spent.iter().all(Option::is_some)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(16 + 12 * self.spent.len());
        self.pos.encode_into(&mut encoder);
        encoder.write_u32_le(self.spent.len() as u32);
        for slot in &self.spent {
            match slot {
                Some(pos) => pos.encode_into(&mut encoder),
                None => DiskTxPos::new(NULL_FILE, 0, 0).encode_into(&mut encoder),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let pos = DiskTxPos::decode_from(&mut decoder)?;
        let count = decoder.read_u32_le()? as usize;
        let mut spent = Vec::with_capacity(count);
        for _ in 0..count {
            let slot = DiskTxPos::decode_from(&mut decoder)?;
            spent.push(if slot.file == NULL_FILE { None } else { Some(slot) });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { pos, spent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_mixed_spent_slots() {
        let entry = TxIndexEntry {
            pos: DiskTxPos::new(3, 4096, 4177),
            spent: vec![
                None,
                Some(DiskTxPos::new(5, 8192, 8300)),
                Some(DiskTxPos::MEMPOOL),
            ],
        };
        let bytes = entry.encode();
        assert_eq!(TxIndexEntry::decode(&bytes).expect("decode"), entry);
    }

    #[test]
    fn new_entry_is_unspent() {
        let entry = TxIndexEntry::new(DiskTxPos::new(1, 0, 81), 4);
        assert_eq!(entry.spent.len(), 4);
        assert!(!entry.fully_spent());
        assert!(entry.spent.iter().all(Option::is_none));
    }

    #[test]
    fn mempool_sentinel() {
        assert!(DiskTxPos::MEMPOOL.is_mempool());
        assert!(!DiskTxPos::new(1, 1, 2).is_mempool());
    }
}
