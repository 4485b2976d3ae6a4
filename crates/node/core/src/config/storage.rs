//! Storage configuration.

use crate::dirs::DataDirs;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use slabd_storage::{KvStore, MemoryKvStore};
use slabd_storage_redb::RedbKvStore;
use std::{path::PathBuf, sync::Arc};

/// Where slabs and sessions live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Slab root; relative paths are under the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Session database; relative paths are under the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_db: Option<PathBuf>,

    /// Keep sessions in memory only. They are lost on restart.
    pub memory_only: bool,
}

impl StorageConfig {
    /// Effective slab root.
    pub fn slab_root(&self, dirs: &DataDirs) -> PathBuf {
        self.root.as_deref().map_or_else(|| dirs.slabs_dir(), |p| dirs.join(p))
    }

    /// Effective session database path.
    pub fn sessions_path(&self, dirs: &DataDirs) -> PathBuf {
        self.sessions_db.as_deref().map_or_else(|| dirs.sessions_db(), |p| dirs.join(p))
    }

    /// Open the session store.
    pub fn open_session_store(&self, dirs: &DataDirs) -> Result<Arc<dyn KvStore>> {
        if self.memory_only {
            return Ok(Arc::new(MemoryKvStore::new()));
        }
        let path = self.sessions_path(dirs);
        let store = RedbKvStore::open(&path)
            .wrap_err_with(|| format!("failed to open session store {}", path.display()))?;
        Ok(Arc::new(store))
    }
}
