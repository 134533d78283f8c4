use super::{KvStore, StorageError, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory store for tests and `--in-memory` nodes.
#[derive(Debug, Default)]
pub struct MemKvStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvStore for MemKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn atomic_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        let mut map = self.map.write();
        for (k, v) in batch.into_ops() {
            map.insert(k, v);
        }
        Ok(())
    }

    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let s = MemKvStore::new();
        s.put(b"a/2", vec![2]).unwrap();
        s.put(b"a/1", vec![1]).unwrap();
        s.put(b"b/1", vec![3]).unwrap();
        let got = s.iterate_prefix(b"a/").unwrap();
        assert_eq!(got, vec![(b"a/1".to_vec(), vec![1]), (b"a/2".to_vec(), vec![2])]);
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let s = MemKvStore::new();
        s.set_fail_writes(true);
        let mut b = WriteBatch::new();
        b.put(b"k".to_vec(), vec![1]);
        assert!(s.atomic_batch(b).is_err());
        assert!(s.is_empty());
    }
}
