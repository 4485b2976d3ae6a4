//! Namespaced key/value storage for session state.
//!
//! The [`KvStore`] trait abstracts over durable backends (redb, see
//! `slabd-storage-redb`) and the in-memory [`MemoryKvStore`] fallback, which is
//! not crash-safe. Values are opaque bytes; [`encode`] and [`decode`] give the
//! postcard codec every caller uses for typed records.

use serde::{Serialize, de::DeserializeOwned};
use slabd_primitives::ErrorKind;

mod memory;
pub use memory::MemoryKvStore;

/// Buckets of the session store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::IntoStaticStr, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Namespace {
    /// Multi-chunk download sessions minted locally.
    DownloadSessions,
    /// Chunk proofs stored under externally issued session ids.
    OnchainProofs,
    /// Single-use fetch tickets.
    FetchSessions,
    /// Anti-replay nonce ledger.
    Replay,
}

impl Namespace {
    /// Bucket name used by backends.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StorageError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Read-modify-write callback for [`KvStore::update`].
///
/// Receives the current value (if any) and returns the value to store, or `None`
/// to leave the entry untouched.
pub type UpdateFn<'a> = dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>> + 'a;

/// Namespaced key/value store.
///
/// Implementations must be thread-safe and make [`KvStore::update`] and
/// [`KvStore::take`] atomic with respect to other calls on the same key.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait KvStore: Send + Sync {
    /// Read a value.
    fn get(&self, ns: Namespace, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Remove a value. Succeeds if the key was absent.
    fn delete(&self, ns: Namespace, key: &[u8]) -> StorageResult<()>;

    /// Remove and return a value in one step.
    fn take(&self, ns: Namespace, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically read and conditionally replace a value.
    ///
    /// Returns `true` when `f` produced a value and it was written.
    fn update(&self, ns: Namespace, key: &[u8], f: &mut UpdateFn<'_>) -> StorageResult<bool>;

    /// All entries of a namespace, ordered by key.
    fn scan(&self, ns: Namespace) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Encode a record for storage.
pub fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| StorageError::Codec(e.to_string()))
}

/// Decode a stored record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    postcard::from_bytes(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}
