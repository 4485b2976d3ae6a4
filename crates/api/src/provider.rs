//! Provider storage interface.

use async_trait::async_trait;
use bytes::Bytes;
use slabd_primitives::{CommitmentId, DealId, ErrorKind};

/// Errors from a provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider does not hold the requested object.
    #[error("not found on provider")]
    NotFound,

    /// Network or 5xx failure; may be retried.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider refused the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotFound => ErrorKind::NotFound,
            ProviderError::Transient(_) => ErrorKind::Unavailable,
            ProviderError::Rejected(_) => ErrorKind::Unauthorized,
        }
    }
}

/// Slab addressed by a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabTarget {
    /// Deal.
    pub deal: DealId,
    /// Slab commitment.
    pub commitment: CommitmentId,
}

impl SlabTarget {
    /// Create a new target.
    pub fn new(deal: DealId, commitment: CommitmentId) -> Self {
        Self { deal, commitment }
    }
}

/// Client side of the provider storage interface.
///
/// `endpoint` is a base URL already resolved by discovery.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Upload a whole unit (unit #0 or a witness unit).
    async fn upload_unit(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        data: Bytes,
    ) -> Result<(), ProviderError>;

    /// Upload one shard of a user-data unit.
    async fn upload_shard(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
        data: Bytes,
    ) -> Result<(), ProviderError>;

    /// Upload the manifest blob.
    async fn upload_manifest_blob(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        data: Bytes,
    ) -> Result<(), ProviderError>;

    /// Fetch one shard of a user-data unit.
    async fn fetch_shard(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
    ) -> Result<Bytes, ProviderError>;
}
