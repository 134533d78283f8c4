//! Single-file durable store.
//!
//! The whole map lives in memory and is rewritten on every batch:
//! serialize -> write `<path>.tmp` -> fsync -> rename over `<path>`.
//! A crash at any point leaves either the old file or the new one.

use super::{KvStore, StorageError, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileKvStore {
    path: PathBuf,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl FileKvStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let map = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = map.len(), "store opened");
        Ok(Self { path, map: RwLock::new(map) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StorageError> {
        let bytes = bincode::serialize(map)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn atomic_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut map = self.map.write();
        let mut next = map.clone();
        for (k, v) in batch.into_ops() {
            next.insert(k, v);
        }
        self.persist(&next)?;
        *map = next;
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
    fn reopen_sees_committed_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.db");
        {
            let s = FileKvStore::open(&path).unwrap();
            let mut b = WriteBatch::new();
            b.put(b"x".to_vec(), vec![1, 2, 3]);
            b.put(b"y".to_vec(), vec![4]);
            s.atomic_batch(b).unwrap();
        }
        let s = FileKvStore::open(&path).unwrap();
        assert_eq!(s.get(b"x").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(s.iterate_prefix(b"").unwrap().len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.db");
        fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff").unwrap();
        assert!(matches!(FileKvStore::open(&path), Err(StorageError::Corrupt(_))));
    }
}
