use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// BTreeMap-backed store; the reference backend and the one the test suite
/// runs against.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("memory store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn scan(&self, column: Column) -> Result<ScanResult, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        let mut results = Vec::new();
        for ((entry_column, key), value) in guard.iter() {
            if *entry_column == column {
                results.push((key.clone(), value.clone()));
            }
        }
        Ok(results)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert(
                        (*column, key.as_slice().to_vec()),
                        value.as_slice().to_vec(),
                    );
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, *b"k", b"one".to_vec());
        batch.put(Column::Meta, *b"k", b"two".to_vec());
        batch.delete(Column::Meta, *b"gone");
        store.write_batch(&batch).expect("write");
        assert_eq!(
            store.get(Column::Meta, b"k").expect("get"),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn columns_are_disjoint() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::TxIndex, *b"k", b"tx".to_vec());
        batch.put(Column::Meta, *b"k", b"meta".to_vec());
        store.write_batch(&batch).expect("write");
        assert_eq!(
            store.get(Column::TxIndex, b"k").expect("get"),
            Some(b"tx".to_vec())
        );
        assert_eq!(store.scan(Column::TxIndex).expect("scan").len(), 1);
    }
}
