//! Transaction types and serialization.

use xcoind_consensus::constants::LOCKTIME_THRESHOLD;
use xcoind_consensus::money::Amount;
use xcoind_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

/// Transactions at or above version 2 carry a reference height.
pub const CURRENT_VERSION: i32 = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn is_final(&self) -> bool {
        self.sequence == u32::MAX
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    /// Face value in base units, denominated at the transaction's reference
    /// height. The spendable (present) value decays from here.
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
    /// Height at which this transaction's amounts are denominated.
    /// Serialized only for version >= 2; legacy v1 transactions are pinned
    /// to height zero.
    pub ref_height: i32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&crate::encoding::encode(self))
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn serialized_size(&self) -> usize {
        crate::encoding::encode(self).len()
    }

    /// Sum of output face values; `None` on i64 overflow (the range rules
    /// reject such a transaction anyway).
    pub fn value_out(&self) -> Option<Amount> {
        let mut total: Amount = 0;
        for output in &self.vout {
            total = total.checked_add(output.value)?;
        }
        Some(total)
    }

    pub fn is_final(&self, height: i32, block_time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let lock_time = self.lock_time as i64;
        let compare = if lock_time < LOCKTIME_THRESHOLD {
            height as i64
        } else {
            block_time
        };
        if lock_time < compare {
            return true;
        }
        self.vin.iter().all(TxIn::is_final)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
        if self.version >= 2 {
            encoder.write_i32_le(self.ref_height);
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin_count = decoder.read_varint()?;
        let vin_count = usize::try_from(vin_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let vout_count = decoder.read_varint()?;
        let vout_count = usize::try_from(vout_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        let ref_height = if version >= 2 {
            decoder.read_i32_le()?
        } else {
            0
        };
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
            ref_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn sample_tx(version: i32) -> Transaction {
        Transaction {
            version,
            vin: vec![TxIn {
                prevout: OutPoint::new([7u8; 32], 1),
                script_sig: vec![0x51],
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 50_000,
                script_pubkey: vec![0x76, 0xa9],
            }],
            lock_time: 0,
            ref_height: 42,
        }
    }

    #[test]
    fn v2_round_trip_carries_ref_height() {
        let tx = sample_tx(2);
        let bytes = encode(&tx);
        let back: Transaction = decode(&bytes).expect("decode");
        assert_eq!(back, tx);
        assert_eq!(back.ref_height, 42);
    }

    #[test]
    fn v1_omits_ref_height() {
        let tx = sample_tx(1);
        let bytes = encode(&tx);
        let back: Transaction = decode(&bytes).expect("decode");
        assert_eq!(back.ref_height, 0);
        assert_eq!(bytes.len() + 4, encode(&sample_tx(2)).len());
    }

    #[test]
    fn coinbase_detection() {
        let mut tx = sample_tx(2);
        assert!(!tx.is_coinbase());
        tx.vin[0].prevout = OutPoint::null();
        assert!(tx.is_coinbase());
    }

    #[test]
    fn finality_by_height_and_time() {
        let mut tx = sample_tx(2);
        tx.lock_time = 100;
        tx.vin[0].sequence = 0;
        assert!(tx.is_final(101, 0));
        assert!(!tx.is_final(100, 0));

        tx.lock_time = 1_600_000_000;
        assert!(tx.is_final(0, 1_600_000_001));
        assert!(!tx.is_final(0, 1_600_000_000));

        tx.vin[0].sequence = u32::MAX;
        assert!(tx.is_final(0, 0));
    }

    #[test]
    fn value_out_overflow_is_none() {
        let mut tx = sample_tx(2);
        tx.vout = vec![
            TxOut {
                value: i64::MAX,
                script_pubkey: Vec::new(),
            },
            TxOut {
                value: 1,
                script_pubkey: Vec::new(),
            },
        ];
        assert_eq!(tx.value_out(), None);
    }
}
