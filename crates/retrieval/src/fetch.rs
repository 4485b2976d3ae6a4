//! Single-use fetch tickets.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use slabd_primitives::DealId;
use slabd_storage::{KvStore, Namespace, decode, encode};
use tracing::debug;

use crate::{RetrievalError, mint_id};

/// One served range bound to its proof, awaiting a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSession {
    /// Ticket id.
    pub id: B256,
    /// Deal served.
    pub deal: DealId,
    /// Ledger epoch at serve time.
    pub epoch: u64,
    /// Serving provider.
    pub provider: Address,
    /// File path.
    pub file_path: String,
    /// First served byte, relative to the file.
    pub range_start: u64,
    /// Requested length (0 = to end of file).
    pub range_len: u64,
    /// Bytes actually served.
    pub bytes_served: u64,
    /// `keccak256` of the proof.
    pub proof_hash: B256,
    /// Unix deadline for the receipt.
    pub expires_at: u64,
}

/// Client acknowledgement of a served range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReceipt {
    /// Ticket id.
    pub session_id: B256,
    /// Deal served.
    pub deal: DealId,
    /// Ledger epoch at serve time.
    pub epoch: u64,
    /// Serving provider.
    pub provider: Address,
    /// File path.
    pub file_path: String,
    /// First served byte.
    pub range_start: u64,
    /// Requested length.
    pub range_len: u64,
    /// Bytes received.
    pub bytes_served: u64,
    /// `keccak256` of the proof received.
    pub proof_hash: B256,
}

impl FetchSession {
    fn mismatch(&self, receipt: &FetchReceipt) -> Option<&'static str> {
        if receipt.deal != self.deal {
            Some("deal")
        } else if receipt.epoch != self.epoch {
            Some("epoch")
        } else if receipt.provider != self.provider {
            Some("provider")
        } else if receipt.file_path != self.file_path {
            Some("file_path")
        } else if receipt.range_start != self.range_start || receipt.range_len != self.range_len {
            Some("range")
        } else if receipt.bytes_served != self.bytes_served {
            Some("bytes_served")
        } else if receipt.proof_hash != self.proof_hash {
            Some("proof_hash")
        } else {
            None
        }
    }
}

/// Fetch tickets: `created -> consumed`, exactly once.
#[derive(Clone)]
pub struct FetchSessions {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl std::fmt::Debug for FetchSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSessions").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

/// Fields of a ticket known at serve time.
#[derive(Debug, Clone)]
pub(crate) struct ServedRange {
    pub(crate) deal: DealId,
    pub(crate) epoch: u64,
    pub(crate) provider: Address,
    pub(crate) file_path: String,
    pub(crate) range_start: u64,
    pub(crate) range_len: u64,
    pub(crate) bytes_served: u64,
    pub(crate) proof_hash: B256,
}

impl FetchSessions {
    /// Create a ticket store; tickets expire `ttl` after creation.
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub(crate) fn create(&self, served: ServedRange, now: u64) -> Result<FetchSession, RetrievalError> {
        let session = FetchSession {
            id: mint_id(),
            deal: served.deal,
            epoch: served.epoch,
            provider: served.provider,
            file_path: served.file_path,
            range_start: served.range_start,
            range_len: served.range_len,
            bytes_served: served.bytes_served,
            proof_hash: served.proof_hash,
            expires_at: now + self.ttl.as_secs(),
        };
        self.store.put(Namespace::FetchSessions, session.id.as_slice(), &encode(&session)?)?;
        debug!(id = %session.id, deal = %session.deal, bytes = session.bytes_served, "Created fetch ticket");
        Ok(session)
    }

    /// Look up a live ticket.
    pub fn get(&self, id: &B256, now: u64) -> Result<FetchSession, RetrievalError> {
        let not_found = || RetrievalError::SessionNotFound(format!("fetch session {id}"));
        let bytes = self.store.get(Namespace::FetchSessions, id.as_slice())?.ok_or_else(not_found)?;
        let session: FetchSession = decode(&bytes)?;
        if session.expires_at <= now {
            self.store.delete(Namespace::FetchSessions, id.as_slice())?;
            return Err(not_found());
        }
        Ok(session)
    }

    /// Consume a ticket with a receipt matching it field for field.
    ///
    /// A mismatching receipt leaves the ticket in place. Of concurrent
    /// matching receipts exactly one succeeds; the rest see `SessionNotFound`.
    pub fn consume(&self, receipt: &FetchReceipt, now: u64) -> Result<FetchSession, RetrievalError> {
        let session = self.get(&receipt.session_id, now)?;
        if let Some(field) = session.mismatch(receipt) {
            return Err(RetrievalError::ReceiptMismatch(field));
        }
        // Tickets are immutable, so whoever removes it consumed it.
        if self.store.take(Namespace::FetchSessions, receipt.session_id.as_slice())?.is_none() {
            return Err(RetrievalError::SessionNotFound(format!(
                "fetch session {}",
                receipt.session_id
            )));
        }
        debug!(id = %session.id, deal = %session.deal, "Consumed fetch ticket");
        Ok(session)
    }

    /// Drop expired tickets. Returns how many were removed.
    pub fn evict_expired(&self, now: u64) -> Result<usize, RetrievalError> {
        let mut removed = 0;
        for (key, value) in self.store.scan(Namespace::FetchSessions)? {
            let expired = decode::<FetchSession>(&value).map_or(true, |s| s.expires_at <= now);
            if expired {
                self.store.delete(Namespace::FetchSessions, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use slabd_storage::MemoryKvStore;

    const NOW: u64 = 1_700_000_000;

    fn sessions() -> FetchSessions {
        FetchSessions::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(60))
    }

    fn served() -> ServedRange {
        ServedRange {
            deal: DealId(3),
            epoch: 12,
            provider: Address::repeat_byte(0x5b),
            file_path: "hello.txt".into(),
            range_start: 6,
            range_len: 5,
            bytes_served: 5,
            proof_hash: B256::repeat_byte(0xab),
        }
    }

    fn receipt(session: &FetchSession) -> FetchReceipt {
        FetchReceipt {
            session_id: session.id,
            deal: session.deal,
            epoch: session.epoch,
            provider: session.provider,
            file_path: session.file_path.clone(),
            range_start: session.range_start,
            range_len: session.range_len,
            bytes_served: session.bytes_served,
            proof_hash: session.proof_hash,
        }
    }

    #[test]
    fn test_consume_once() {
        let sessions = sessions();
        let session = sessions.create(served(), NOW).unwrap();
        assert_eq!(session.expires_at, NOW + 60);

        let consumed = sessions.consume(&receipt(&session), NOW + 1).unwrap();
        assert_eq!(consumed, session);
        assert_matches!(
            sessions.consume(&receipt(&session), NOW + 2),
            Err(RetrievalError::SessionNotFound(_))
        );
    }

    #[test]
    fn test_mismatch_keeps_ticket() {
        let sessions = sessions();
        let session = sessions.create(served(), NOW).unwrap();

        let mut wrong = receipt(&session);
        wrong.bytes_served = 4;
        assert_matches!(
            sessions.consume(&wrong, NOW),
            Err(RetrievalError::ReceiptMismatch("bytes_served"))
        );

        let mut wrong = receipt(&session);
        wrong.proof_hash = B256::ZERO;
        assert_matches!(
            sessions.consume(&wrong, NOW),
            Err(RetrievalError::ReceiptMismatch("proof_hash"))
        );

        sessions.consume(&receipt(&session), NOW).unwrap();
    }

    #[test]
    fn test_expired_ticket() {
        let sessions = sessions();
        let session = sessions.create(served(), NOW).unwrap();
        let kept = sessions.create(served(), NOW + 30).unwrap();

        assert_matches!(
            sessions.consume(&receipt(&session), NOW + 60),
            Err(RetrievalError::SessionNotFound(_))
        );
        assert_eq!(sessions.evict_expired(NOW + 200).unwrap(), 1);
        assert_matches!(sessions.get(&kept.id, NOW), Err(RetrievalError::SessionNotFound(_)));
    }
}
