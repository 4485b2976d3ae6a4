//! Ledger query interface.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slabd_primitives::{CommitmentId, DealId, ErrorKind, StripeError, StripeParams};

/// Errors returned by the ledger query service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The queried object does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream failure that may succeed on retry (5xx class).
    #[error("transient ledger error: {0}")]
    Transient(String),

    /// Any other failure.
    #[error("ledger error: {0}")]
    Other(String),
}

impl LedgerError {
    /// Whether the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }

    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Transient(_) => ErrorKind::Unavailable,
            LedgerError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// A storage deal as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    /// Deal id.
    pub id: DealId,
    /// Deal owner.
    pub owner: Address,
    /// Current content root, `None` before the first commit.
    pub content_root: Option<CommitmentId>,
    /// Service parameters (stripe hints).
    pub service_params: String,
    /// Assigned providers, in slot order.
    pub providers: Vec<Address>,
}

impl Deal {
    /// Stripe parameters derived from the service parameters.
    pub fn stripe_params(&self) -> Result<StripeParams, StripeError> {
        StripeParams::from_service_params(&self.service_params)
    }
}

/// Lifecycle state of an on-chain retrieval session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OnChainSessionStatus {
    /// Accepting chunks.
    Open,
    /// Settled; no further chunks.
    Completed,
    /// Past its deadline.
    Expired,
}

/// An externally-issued retrieval session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainSession {
    /// Session id issued by the ledger.
    pub id: B256,
    /// Deal the session belongs to.
    pub deal: DealId,
    /// Owner that opened the session.
    pub owner: Address,
    /// Provider expected to serve it.
    pub provider: Address,
    /// Content root the session was opened against.
    pub content_root: CommitmentId,
    /// File path.
    pub file_path: String,
    /// First byte of the window.
    pub range_start: u64,
    /// Window length in bytes.
    pub range_len: u64,
    /// Unix deadline.
    pub expires_at: u64,
    /// Current status.
    pub status: OnChainSessionStatus,
}

/// Read-only key/value view of the ledger.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Fetch a deal.
    async fn get_deal(&self, deal: DealId) -> Result<Deal, LedgerError>;

    /// Advertised transport endpoints of a provider.
    async fn get_provider_endpoints(&self, provider: &Address) -> Result<Vec<String>, LedgerError>;

    /// Current ledger epoch.
    async fn current_epoch(&self) -> Result<u64, LedgerError>;

    /// Fetch an on-chain retrieval session.
    async fn get_retrieval_session(&self, session: &B256) -> Result<OnChainSession, LedgerError>;
}
