//! redb-backed [`KvStore`].
//!
//! Each [`Namespace`] maps to one redb table. Writes go through a single write
//! transaction, which redb serializes, so [`KvStore::update`] and
//! [`KvStore::take`] are atomic.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use slabd_storage::{KvStore, Namespace, StorageError, StorageResult, UpdateFn};
use strum::IntoEnumIterator;
use tracing::debug;

type Bucket = TableDefinition<'static, &'static [u8], &'static [u8]>;

fn bucket(ns: Namespace) -> Bucket {
    TableDefinition::new(ns.as_str())
}

fn db_err(err: impl std::fmt::Display) -> StorageError {
    StorageError::Database(err.to_string())
}

/// Durable session store.
pub struct RedbKvStore {
    db: Database,
}

impl std::fmt::Debug for RedbKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKvStore").finish_non_exhaustive()
    }
}

impl RedbKvStore {
    /// Open or create a store at `path`, creating every namespace table.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(db_err)?;

        let write_txn = db.begin_write().map_err(db_err)?;
        for ns in Namespace::iter() {
            write_txn.open_table(bucket(ns)).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        debug!(path = %path.display(), "Opened redb session store");
        Ok(Self { db })
    }

    fn write<T>(
        &self,
        ns: Namespace,
        op: impl FnOnce(&mut redb::Table<'_, &'static [u8], &'static [u8]>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let out = {
            let mut table = write_txn.open_table(bucket(ns)).map_err(db_err)?;
            op(&mut table)?
        };
        write_txn.commit().map_err(db_err)?;
        metrics::counter!("slabd.storage.writes", "namespace" => ns.as_str()).increment(1);
        Ok(out)
    }
}

impl KvStore for RedbKvStore {
    fn get(&self, ns: Namespace, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(bucket(ns)).map_err(db_err)?;
        Ok(table.get(key).map_err(db_err)?.map(|v| v.value().to_vec()))
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.write(ns, |table| {
            table.insert(key, value).map_err(db_err)?;
            Ok(())
        })
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> StorageResult<()> {
        self.write(ns, |table| {
            table.remove(key).map_err(db_err)?;
            Ok(())
        })
    }

    fn take(&self, ns: Namespace, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.write(ns, |table| {
            Ok(table.remove(key).map_err(db_err)?.map(|v| v.value().to_vec()))
        })
    }

    fn update(&self, ns: Namespace, key: &[u8], f: &mut UpdateFn<'_>) -> StorageResult<bool> {
        self.write(ns, |table| {
            let current = table.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
            match f(current.as_deref()) {
                Some(value) => {
                    table.insert(key, value.as_slice()).map_err(db_err)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn scan(&self, ns: Namespace) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(bucket(ns)).map_err(db_err)?;

        let mut entries = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }
}
