//! Slab ingest.
//!
//! Two encoders share one pipeline: encode each user-data unit on a bounded
//! blocking pool, chain their commitments through witness units, record every
//! root in unit #0, aggregate `[unit0, witness.., user..]` into the slab
//! commitment, and publish the staged directory with a single rename.
//!
//! - [`PlainIngest`] keeps whole user units locally and supports
//!   [`PlainIngest::append`], which always produces a new slab.
//! - [`ErasureIngest`] keeps K+M shards per unit, replicates unit #0, witness
//!   units and the manifest to every provider slot and sends each shard to its
//!   own slot only.

use std::{io, path::PathBuf, time::Duration};

use bytes::Bytes;
use metrics::Counter;
use slabd_api::{EngineError, ProviderError};
use slabd_discovery::DiscoveryError;
use slabd_primitives::{CommitmentId, ErrorKind};
use slabd_slab::{FileRecord, SlabError};

mod build;
mod erasure;
mod plain;
mod pool;
mod staging;

pub use erasure::ErasureIngest;
pub use plain::PlainIngest;

/// Default ingest deadline.
pub const DEFAULT_INGEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors from ingest.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Slab layout or file table error.
    #[error(transparent)]
    Slab(#[from] SlabError),

    /// Commitment engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Provider resolution failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A provider rejected or failed an upload.
    #[error("upload to slot {slot} failed: {source}")]
    Upload {
        /// Provider slot.
        slot: usize,
        /// Provider error.
        #[source]
        source: ProviderError,
    },

    /// Bad arguments (mode, path, size).
    #[error("invalid ingest request: {0}")]
    InvalidRequest(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Deadline elapsed; nothing was published.
    #[error("ingest timed out after {0:?}")]
    Timeout(Duration),

    /// A worker was cancelled; nothing was published.
    #[error("ingest cancelled")]
    Cancelled,

    /// A worker panicked.
    #[error("ingest worker failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Slab(e) => e.kind(),
            IngestError::Engine(e) => e.kind(),
            IngestError::Discovery(e) => e.kind(),
            IngestError::Upload { source, .. } => source.kind(),
            IngestError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            IngestError::Io(_) | IngestError::Task(_) => ErrorKind::Internal,
            IngestError::Timeout(_) => ErrorKind::Timeout,
            IngestError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() { IngestError::Cancelled } else { IngestError::Task(e.to_string()) }
    }
}

/// Ingest tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Concurrent unit encoders.
    pub parallelism: usize,
    /// Deadline for one whole ingest.
    pub timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            timeout: DEFAULT_INGEST_TIMEOUT,
        }
    }
}

/// A file to store.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Path recorded in the file table.
    pub path: String,
    /// File contents.
    pub data: Bytes,
    /// Unix seconds recorded in the file table. Part of unit #0, and so of the
    /// commitment: re-ingesting identical input yields the same slab only if
    /// this is stable too.
    pub timestamp: u64,
    /// Flag bits recorded in the file table.
    pub flags: u8,
}

impl IngestRequest {
    /// Request with timestamp 0 and no flags.
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { path: path.into(), data: data.into(), timestamp: 0, flags: 0 }
    }

    /// Set the recorded timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the recorded flags.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }
}

/// A published slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    /// Slab commitment.
    pub commitment: CommitmentId,
    /// Canonical slab directory.
    pub dir: PathBuf,
    /// Witness units.
    pub witness_count: u64,
    /// User-data units.
    pub user_units: u64,
    /// Record of the ingested file.
    pub file: FileRecord,
    /// The slab already existed and was left untouched.
    pub already_published: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct IngestMetrics {
    pub(crate) slabs_published: Counter,
    pub(crate) slabs_reused: Counter,
    pub(crate) units_encoded: Counter,
    pub(crate) bytes_ingested: Counter,
    pub(crate) shards_uploaded: Counter,
    pub(crate) failures: Counter,
}

impl IngestMetrics {
    pub(crate) fn new(mode: &'static str) -> Self {
        Self {
            slabs_published: metrics::counter!("slabd.ingest.slabs_published", "mode" => mode),
            slabs_reused: metrics::counter!("slabd.ingest.slabs_reused", "mode" => mode),
            units_encoded: metrics::counter!("slabd.ingest.units_encoded", "mode" => mode),
            bytes_ingested: metrics::counter!("slabd.ingest.bytes", "mode" => mode),
            shards_uploaded: metrics::counter!("slabd.ingest.shards_uploaded", "mode" => mode),
            failures: metrics::counter!("slabd.ingest.failures", "mode" => mode),
        }
    }
}

/// Run `fut` under `timeout`, counting failures.
pub(crate) async fn with_deadline<T>(
    timeout: Duration,
    metrics: &IngestMetrics,
    fut: impl Future<Output = Result<T, IngestError>>,
) -> Result<T, IngestError> {
    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout(timeout)),
    };
    if result.is_err() {
        metrics.failures.increment(1);
    }
    result
}

pub(crate) fn check_request(request: &IngestRequest) -> Result<(), IngestError> {
    if request.path.is_empty() {
        return Err(IngestError::InvalidRequest("empty file path".into()));
    }
    Ok(())
}
