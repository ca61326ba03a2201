//! Transactional view over the storage engine.
//!
//! All chain mutations are staged between `begin` and `commit`; reads made
//! inside the transaction observe the staged writes. `commit` hands the
//! accumulated batch to the backend in one atomic write, `abort` drops it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use primitive_types::U256;
use xcoind_consensus::Hash256;
use xcoind_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::blockindex::DiskBlockIndex;
use crate::txindex::TxIndexEntry;

const META_BEST_CHAIN: &[u8] = b"hash_best_chain";
const META_BEST_INVALID_WORK: &[u8] = b"best_invalid_work";

#[derive(Debug)]
pub enum ChainDbError {
    Store(StoreError),
    Corrupt(&'static str),
    /// `begin` while a transaction is open, or a write with none open.
    TxnState(&'static str),
}

impl std::fmt::Display for ChainDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainDbError::Store(err) => write!(f, "{err}"),
            ChainDbError::Corrupt(message) => write!(f, "{message}"),
            ChainDbError::TxnState(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainDbError {}

impl From<StoreError> for ChainDbError {
    fn from(err: StoreError) -> Self {
        ChainDbError::Store(err)
    }
}

#[derive(Default)]
struct Staged {
    /// Read-your-writes overlay: `None` marks a staged delete.
    overlay: HashMap<(Column, Vec<u8>), Option<Vec<u8>>>,
    batch: WriteBatch,
}

pub struct ChainDb<S> {
    store: Arc<S>,
    txn: Mutex<Option<Staged>>,
}

impl<S: KeyValueStore> ChainDb<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            txn: Mutex::new(None),
        }
    }

    pub fn begin(&self) -> Result<(), ChainDbError> {
        let mut txn = self.txn.lock().expect("chain db lock");
        if txn.is_some() {
            return Err(ChainDbError::TxnState("transaction already open"));
        }
        *txn = Some(Staged::default());
        Ok(())
    }

    pub fn commit(&self) -> Result<(), ChainDbError> {
        let staged = self
            .txn
            .lock()
            .expect("chain db lock")
            .take()
            .ok_or(ChainDbError::TxnState("commit without begin"))?;
        self.store.write_batch(&staged.batch)?;
        Ok(())
    }

    pub fn abort(&self) {
        *self.txn.lock().expect("chain db lock") = None;
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.lock().expect("chain db lock").is_some()
    }

    fn read(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, ChainDbError> {
        {
            let txn = self.txn.lock().expect("chain db lock");
            if let Some(staged) = txn.as_ref() {
                if let Some(entry) = staged.overlay.get(&(column, key.to_vec())) {
                    return Ok(entry.clone());
                }
            }
        }
        Ok(self.store.get(column, key)?)
    }

    fn write(&self, column: Column, key: &[u8], value: Vec<u8>) -> Result<(), ChainDbError> {
        let mut txn = self.txn.lock().expect("chain db lock");
        let staged = txn
            .as_mut()
            .ok_or(ChainDbError::TxnState("write outside transaction"))?;
        staged
            .overlay
            .insert((column, key.to_vec()), Some(value.clone()));
        staged.batch.put(column, key.to_vec(), value);
        Ok(())
    }

    fn erase(&self, column: Column, key: &[u8]) -> Result<(), ChainDbError> {
        let mut txn = self.txn.lock().expect("chain db lock");
        let staged = txn
            .as_mut()
            .ok_or(ChainDbError::TxnState("erase outside transaction"))?;
        staged.overlay.insert((column, key.to_vec()), None);
        staged.batch.delete(column, key.to_vec());
        Ok(())
    }

    pub fn read_tx_index(&self, txid: &Hash256) -> Result<Option<TxIndexEntry>, ChainDbError> {
        match self.read(Column::TxIndex, txid)? {
            Some(bytes) => TxIndexEntry::decode(&bytes)
                .map(Some)
                .map_err(|_| ChainDbError::Corrupt("invalid tx index entry")),
            None => Ok(None),
        }
    }

    pub fn update_tx_index(&self, txid: &Hash256, entry: &TxIndexEntry) -> Result<(), ChainDbError> {
        self.write(Column::TxIndex, txid, entry.encode())
    }

    pub fn erase_tx_index(&self, txid: &Hash256) -> Result<(), ChainDbError> {
        self.erase(Column::TxIndex, txid)
    }

    pub fn contains_tx(&self, txid: &Hash256) -> Result<bool, ChainDbError> {
        Ok(self.read(Column::TxIndex, txid)?.is_some())
    }

    pub fn write_block_index(
        &self,
        hash: &Hash256,
        entry: &DiskBlockIndex,
    ) -> Result<(), ChainDbError> {
        self.write(Column::BlockIndex, hash, entry.encode())
    }

    /// Full block-index scan; startup only.
    pub fn read_block_index(&self) -> Result<Vec<(Hash256, DiskBlockIndex)>, ChainDbError> {
        let rows = self.store.scan(Column::BlockIndex)?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let hash: Hash256 = key
                .as_slice()
                .try_into()
                .map_err(|_| ChainDbError::Corrupt("invalid block index key"))?;
            let entry = DiskBlockIndex::decode(&value)
                .map_err(|_| ChainDbError::Corrupt("invalid block index entry"))?;
            out.push((hash, entry));
        }
        Ok(out)
    }

    pub fn write_hash_best_chain(&self, hash: &Hash256) -> Result<(), ChainDbError> {
        self.write(Column::Meta, META_BEST_CHAIN, hash.to_vec())
    }

    pub fn read_hash_best_chain(&self) -> Result<Option<Hash256>, ChainDbError> {
        match self.read(Column::Meta, META_BEST_CHAIN)? {
            Some(bytes) => Ok(Some(bytes.as_slice().try_into().map_err(|_| {
                ChainDbError::Corrupt("invalid best chain hash")
            })?)),
            None => Ok(None),
        }
    }

    pub fn write_best_invalid_work(&self, work: U256) -> Result<(), ChainDbError> {
        self.write(
            Column::Meta,
            META_BEST_INVALID_WORK,
            work.to_little_endian().to_vec(),
        )
    }

    pub fn read_best_invalid_work(&self) -> Result<U256, ChainDbError> {
        match self.read(Column::Meta, META_BEST_INVALID_WORK)? {
            Some(bytes) if bytes.len() == 32 => Ok(U256::from_little_endian(&bytes)),
            Some(_) => Err(ChainDbError::Corrupt("invalid best invalid work")),
            None => Ok(U256::zero()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txindex::DiskTxPos;
    use xcoind_storage::memory::MemoryStore;

    fn db() -> ChainDb<MemoryStore> {
        ChainDb::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn reads_observe_staged_writes() {
        let db = db();
        let txid = [1u8; 32];
        let entry = TxIndexEntry::new(DiskTxPos::new(1, 8, 89), 2);

        db.begin().expect("begin");
        db.update_tx_index(&txid, &entry).expect("update");
        assert_eq!(db.read_tx_index(&txid).expect("read"), Some(entry.clone()));
        assert!(db.contains_tx(&txid).expect("contains"));
        db.commit().expect("commit");

        assert_eq!(db.read_tx_index(&txid).expect("read"), Some(entry));
    }

    #[test]
    fn abort_discards_staged_writes() {
        let db = db();
        let txid = [2u8; 32];
        db.begin().expect("begin");
        db.update_tx_index(&txid, &TxIndexEntry::new(DiskTxPos::new(1, 8, 89), 1))
            .expect("update");
        db.abort();
        assert_eq!(db.read_tx_index(&txid).expect("read"), None);
        assert!(!db.in_transaction());
    }

    #[test]
    fn staged_erase_shadows_committed_value() {
        let db = db();
        let txid = [3u8; 32];
        db.begin().expect("begin");
        db.update_tx_index(&txid, &TxIndexEntry::new(DiskTxPos::new(1, 8, 89), 1))
            .expect("update");
        db.commit().expect("commit");

        db.begin().expect("begin");
        db.erase_tx_index(&txid).expect("erase");
        assert_eq!(db.read_tx_index(&txid).expect("read"), None);
        db.commit().expect("commit");
        assert_eq!(db.read_tx_index(&txid).expect("read"), None);
    }

    #[test]
    fn nested_begin_rejected() {
        let db = db();
        db.begin().expect("begin");
        assert!(db.begin().is_err());
    }

    #[test]
    fn best_chain_and_invalid_work_round_trip() {
        let db = db();
        db.begin().expect("begin");
        db.write_hash_best_chain(&[9u8; 32]).expect("write");
        db.write_best_invalid_work(U256::from(77u64)).expect("write");
        db.commit().expect("commit");
        assert_eq!(db.read_hash_best_chain().expect("read"), Some([9u8; 32]));
        assert_eq!(db.read_best_invalid_work().expect("read"), U256::from(77u64));
    }
}
