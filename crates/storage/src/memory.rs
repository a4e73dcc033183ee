use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// BTreeMap-backed store for tests. Batches commit under a single write
/// lock, so readers see a batch all-or-nothing like the durable backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        guard.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        guard.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        let mut results = Vec::new();
        for ((_, key), value) in prefix_range(&guard, column, prefix) {
            results.push((key.clone(), value.clone()));
        }
        Ok(results)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        for ((_, key), value) in prefix_range(&guard, column, prefix) {
            visitor(key.as_slice(), value.as_slice())?;
        }
        Ok(())
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

fn prefix_range<'a>(
    map: &'a MemoryStoreMap,
    column: Column,
    prefix: &'a [u8],
) -> impl Iterator<Item = (&'a (Column, Vec<u8>), &'a Vec<u8>)> {
    let start = (column, prefix.to_vec());
    map.range((Bound::Included(start), Bound::Unbounded))
        .take_while(move |((entry_column, key), _)| {
            *entry_column == column && key.starts_with(prefix)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_is_ordered_and_column_scoped() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"b", b"2").expect("put");
        store.put(Column::Meta, b"a", b"1").expect("put");
        store.put(Column::Meta, b"ab", b"3").expect("put");
        store.put(Column::SpentIndex, b"a", b"x").expect("put");

        let entries = store.scan_prefix(Column::Meta, b"a").expect("scan");
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"ab".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn batch_applies_puts_and_deletes() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"gone", b"x").expect("put");

        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"kept".as_slice(), b"y".as_slice());
        batch.delete(Column::Meta, b"gone".as_slice());
        store.write_batch(&batch).expect("commit");

        assert_eq!(store.get(Column::Meta, b"gone").expect("get"), None);
        assert_eq!(
            store.get(Column::Meta, b"kept").expect("get"),
            Some(b"y".to_vec())
        );
    }
}
