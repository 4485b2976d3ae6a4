//! Retrieval: proof-carrying byte ranges behind an authorization gate.
//!
//! A fetch is served only after the caller proves deal ownership, the slab
//! matches the ledger content root and, when signatures are required, an
//! EIP-712 `RetrievalRequest` signed by the owner is presented and its nonce is
//! fresh. Every served range stays inside one blob and carries a chained proof
//! to the slab commitment.
//!
//! Served ranges are accounted in one of three ways:
//!
//! - single-use fetch tickets ([`FetchSessions`]), consumed by a matching receipt;
//! - locally minted download sessions ([`DownloadSessions`]), closed by a bundled
//!   receipt carrying the total byte count and the Merkle root of the chunk log;
//! - externally issued sessions, whose proofs are stored under the ledger's id
//!   after the ledger reports the session open.

use std::{io, time::Duration};

use metrics::Counter;
use slabd_api::EngineError;
use slabd_discovery::DiscoveryError;
use slabd_erasure::ReconstructError;
use slabd_primitives::{CommitmentId, ErrorKind};
use slabd_slab::SlabError;
use slabd_storage::StorageError;

mod auth;
mod download;
mod fetch;
pub mod headers;
pub mod merkle;
mod replay;
mod service;

pub use auth::{Authorizer, DOMAIN_NAME, DOMAIN_VERSION, RetrievalRequest, SignedRange};
pub use download::{ChunkRecord, DownloadReceipt, DownloadSession, DownloadSessions, DownloadWindow};
pub use fetch::{FetchReceipt, FetchSession, FetchSessions};
pub use replay::ReplayGuard;
pub use service::{
    FetchRequest, FetchResponse, OpenDownload, RetrievalDeps, RetrievalService, SessionRef,
};

/// Default chain id of the signing domain.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// Default upper bound on how far in the future a signed request may expire.
pub const DEFAULT_MAX_EXPIRY_WINDOW: Duration = Duration::from_secs(3600);

/// Default lifetime of fetch tickets and download sessions.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(900);

/// Errors from retrieval.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Slab lookup, layout or range error.
    #[error(transparent)]
    Slab(#[from] SlabError),

    /// Ledger lookup failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The unit could not be rebuilt.
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),

    /// Proof generation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Session store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Owner or signature does not match the deal.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The slab is not the deal's current content root.
    #[error("slab {actual} is not the content root of the deal (ledger has {expected:?})")]
    Conflict {
        /// Root reported by the ledger.
        expected: Option<CommitmentId>,
        /// Slab the caller asked for.
        actual: CommitmentId,
    },

    /// Nonce reused, or expiry outside the accepted window.
    #[error("replay rejected: {0}")]
    ReplayRejected(String),

    /// Unknown, expired or already consumed session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A receipt field differs from the recorded session.
    #[error("receipt does not match session: {0}")]
    ReceiptMismatch(&'static str),

    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("retrieval task failed: {0}")]
    Task(String),
}

impl RetrievalError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Slab(e) => e.kind(),
            RetrievalError::Discovery(e) => e.kind(),
            RetrievalError::Reconstruct(e) => e.kind(),
            RetrievalError::Engine(e) => e.kind(),
            RetrievalError::Storage(e) => e.kind(),
            RetrievalError::Unauthorized(_) => ErrorKind::Unauthorized,
            RetrievalError::Conflict { .. } => ErrorKind::Conflict,
            RetrievalError::ReplayRejected(_) => ErrorKind::ReplayRejected,
            RetrievalError::SessionNotFound(_) => ErrorKind::NotFound,
            RetrievalError::ReceiptMismatch(_) | RetrievalError::InvalidRequest(_) => {
                ErrorKind::InvalidRequest
            }
            RetrievalError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            RetrievalError::Io(_) | RetrievalError::Task(_) => ErrorKind::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for RetrievalError {
    fn from(e: tokio::task::JoinError) -> Self {
        RetrievalError::Task(e.to_string())
    }
}

/// Retrieval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// Reject fetches without an owner signature.
    pub require_signatures: bool,
    /// Mint a single-use fetch ticket for fetches outside any session.
    pub fetch_tickets: bool,
    /// Chain id of the EIP-712 signing domain.
    pub chain_id: u64,
    /// Longest accepted distance between now and a signed expiry.
    pub max_expiry_window: Duration,
    /// Lifetime of fetch tickets and download sessions.
    pub session_ttl: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            require_signatures: true,
            fetch_tickets: true,
            chain_id: DEFAULT_CHAIN_ID,
            max_expiry_window: DEFAULT_MAX_EXPIRY_WINDOW,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RetrievalMetrics {
    pub(crate) fetches: Counter,
    pub(crate) bytes_served: Counter,
    pub(crate) rejected: Counter,
    pub(crate) tickets_created: Counter,
    pub(crate) tickets_consumed: Counter,
    pub(crate) chunks_logged: Counter,
    pub(crate) sessions_closed: Counter,
}

impl Default for RetrievalMetrics {
    fn default() -> Self {
        Self {
            fetches: metrics::counter!("slabd.retrieval.fetches"),
            bytes_served: metrics::counter!("slabd.retrieval.bytes_served"),
            rejected: metrics::counter!("slabd.retrieval.rejected"),
            tickets_created: metrics::counter!("slabd.retrieval.tickets_created"),
            tickets_consumed: metrics::counter!("slabd.retrieval.tickets_consumed"),
            chunks_logged: metrics::counter!("slabd.retrieval.chunks_logged"),
            sessions_closed: metrics::counter!("slabd.retrieval.sessions_closed"),
        }
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Fresh random session id.
pub(crate) fn mint_id() -> alloy_primitives::B256 {
    alloy_primitives::B256::from(rand::random::<[u8; 32]>())
}
