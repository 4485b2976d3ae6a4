//! In-memory [`KvStore`].

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{KvStore, Namespace, StorageResult, UpdateFn};

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<(Namespace, Vec<u8>), Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a namespace.
    pub fn len(&self, ns: Namespace) -> usize {
        self.entries.read().keys().filter(|(n, _)| *n == ns).count()
    }

    /// Whether a namespace is empty.
    pub fn is_empty(&self, ns: Namespace) -> bool {
        self.len(ns) == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, ns: Namespace, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(&(ns, key.to_vec())).cloned())
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.entries.write().insert((ns, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(&(ns, key.to_vec()));
        Ok(())
    }

    fn take(&self, ns: Namespace, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.write().remove(&(ns, key.to_vec())))
    }

    fn update(&self, ns: Namespace, key: &[u8], f: &mut UpdateFn<'_>) -> StorageResult<bool> {
        let mut entries = self.entries.write();
        let id = (ns, key.to_vec());
        match f(entries.get(&id).map(Vec::as_slice)) {
            Some(value) => {
                entries.insert(id, value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan(&self, ns: Namespace) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|((n, _), _)| *n == ns)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }
}
