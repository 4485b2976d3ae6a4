//! Multi-chunk download sessions.
//!
//! `open -> (chunk appended)* -> closed`, or evicted at expiry. Sessions are
//! written through to the session store on every change and cached in a
//! concurrent map; a restarted node reloads them from the store on first use.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use slabd_api::OnChainSession;
use slabd_primitives::DealId;
use slabd_storage::{KvStore, Namespace, StorageError, decode, encode};
use tracing::debug;

use crate::{RetrievalError, merkle, mint_id};

/// One served chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// First byte, relative to the file.
    pub range_start: u64,
    /// Bytes served.
    pub range_len: u64,
    /// `keccak256` of the chunk proof.
    pub proof_hash: B256,
}

/// What a download session may serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadWindow {
    /// Deal.
    pub deal: DealId,
    /// Authorized owner.
    pub owner: Address,
    /// Serving provider.
    pub provider: Address,
    /// File path.
    pub file_path: String,
    /// First byte of the window.
    pub start: u64,
    /// Window length; 0 means to end of file.
    pub len: u64,
}

/// A locally minted download session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSession {
    /// Session id.
    pub id: B256,
    /// Deal.
    pub deal: DealId,
    /// Authorized owner.
    pub owner: Address,
    /// Serving provider.
    pub provider: Address,
    /// File path.
    pub file_path: String,
    /// First byte of the window.
    pub window_start: u64,
    /// Window length; 0 means to end of file.
    pub window_len: u64,
    /// Unix deadline.
    pub expires_at: u64,
    /// Served chunks, in serve order.
    pub chunks: Vec<ChunkRecord>,
}

impl DownloadSession {
    /// Sum of served chunk lengths.
    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.range_len).sum()
    }

    /// Merkle root of the chunk log.
    pub fn chunk_root(&self) -> B256 {
        merkle::chunk_root(&self.chunks)
    }

    /// Whether `[start, start + len)` lies inside the window.
    pub fn covers(&self, start: u64, len: u64) -> bool {
        covers(self.window_start, self.window_len, start, len)
    }
}

/// Bundled receipt closing a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReceipt {
    /// Session id.
    pub session_id: B256,
    /// Total bytes the client received.
    pub total_bytes: u64,
    /// Merkle root the client computed over the chunk log.
    pub chunk_root: B256,
}

/// Download session manager.
pub struct DownloadSessions {
    store: Arc<dyn KvStore>,
    live: DashMap<B256, DownloadSession>,
    ttl: Duration,
}

impl std::fmt::Debug for DownloadSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSessions")
            .field("live", &self.live.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl DownloadSessions {
    /// Create a manager; sessions expire `ttl` after opening.
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, live: DashMap::new(), ttl }
    }

    /// Open a session over `window`.
    pub fn open(&self, window: DownloadWindow, now: u64) -> Result<DownloadSession, RetrievalError> {
        let session = DownloadSession {
            id: mint_id(),
            deal: window.deal,
            owner: window.owner,
            provider: window.provider,
            file_path: window.file_path,
            window_start: window.start,
            window_len: window.len,
            expires_at: now + self.ttl.as_secs(),
            chunks: Vec::new(),
        };
        self.persist(&session)?;
        self.live.insert(session.id, session.clone());
        debug!(id = %session.id, deal = %session.deal, path = %session.file_path, "Opened download session");
        Ok(session)
    }

    /// A live session.
    pub fn get(&self, id: &B256, now: u64) -> Result<DownloadSession, RetrievalError> {
        self.load(id, now)?;
        self.live.get(id).map(|s| s.value().clone()).ok_or_else(|| not_found(id))
    }

    /// Log a served chunk. Returns the log length.
    pub fn append_chunk(
        &self,
        id: &B256,
        chunk: ChunkRecord,
        now: u64,
    ) -> Result<usize, RetrievalError> {
        self.load(id, now)?;
        let mut session = self.live.get_mut(id).ok_or_else(|| not_found(id))?;
        if !session.covers(chunk.range_start, chunk.range_len) {
            return Err(RetrievalError::InvalidRequest(format!(
                "chunk [{}, +{}) is outside the session window",
                chunk.range_start, chunk.range_len
            )));
        }

        session.chunks.push(chunk);
        if let Err(e) = self.persist(&session) {
            session.chunks.pop();
            return Err(e.into());
        }
        Ok(session.chunks.len())
    }

    /// Close a session with a receipt matching its byte total and chunk root.
    ///
    /// A mismatching receipt leaves the session open.
    pub fn close(&self, receipt: &DownloadReceipt, now: u64) -> Result<DownloadSession, RetrievalError> {
        let id = receipt.session_id;
        self.load(&id, now)?;

        // The store entry goes while the map shard is locked, so no append
        // can slip in between the check and the removal.
        let mut failure: Option<StorageError> = None;
        let closed = self.live.remove_if(&id, |_, session| {
            if session.total_bytes() != receipt.total_bytes
                || session.chunk_root() != receipt.chunk_root
            {
                return false;
            }
            match self.store.delete(Namespace::DownloadSessions, id.as_slice()) {
                Ok(()) => true,
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        });
        if let Some(e) = failure {
            return Err(e.into());
        }
        let Some((_, session)) = closed else {
            return match self.live.get(&id) {
                Some(session) if session.total_bytes() != receipt.total_bytes => {
                    Err(RetrievalError::ReceiptMismatch("total_bytes"))
                }
                Some(_) => Err(RetrievalError::ReceiptMismatch("chunk_root")),
                None => Err(not_found(&id)),
            };
        };

        debug!(%id, chunks = session.chunks.len(), bytes = receipt.total_bytes, "Closed download session");
        Ok(session)
    }

    /// Drop sessions past their deadline. Returns how many were removed.
    pub fn evict_expired(&self, now: u64) -> Result<usize, RetrievalError> {
        let mut removed = 0;
        for (key, value) in self.store.scan(Namespace::DownloadSessions)? {
            let expired = decode::<DownloadSession>(&value).map_or(true, |s| s.expires_at <= now);
            if expired {
                self.store.delete(Namespace::DownloadSessions, &key)?;
                if key.len() == 32 {
                    self.live.remove(&B256::from_slice(&key));
                }
                removed += 1;
            }
        }
        self.live.retain(|_, session| session.expires_at > now);
        if removed > 0 {
            debug!(removed, "Evicted expired download sessions");
        }
        Ok(removed)
    }

    /// Log a chunk under an externally issued session. The caller has checked
    /// that the ledger reports it open. Returns the log length.
    pub fn append_onchain_chunk(
        &self,
        session: &OnChainSession,
        chunk: ChunkRecord,
    ) -> Result<usize, RetrievalError> {
        if !covers(session.range_start, session.range_len, chunk.range_start, chunk.range_len) {
            return Err(RetrievalError::InvalidRequest(format!(
                "chunk [{}, +{}) is outside session {}",
                chunk.range_start, chunk.range_len, session.id
            )));
        }

        let mut failure: Option<StorageError> = None;
        let mut count = 0;
        self.store.update(Namespace::OnchainProofs, session.id.as_slice(), &mut |current| {
            let mut chunks = match current.map(decode::<Vec<ChunkRecord>>).transpose() {
                Ok(chunks) => chunks.unwrap_or_default(),
                Err(e) => {
                    failure = Some(e);
                    return None;
                }
            };
            chunks.push(chunk);
            count = chunks.len();
            match encode(&chunks) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e.into());
        }
        debug!(id = %session.id, chunks = count, "Logged on-chain session chunk");
        Ok(count)
    }

    /// Chunk log of an externally issued session.
    pub fn onchain_chunks(&self, id: &B256) -> Result<Vec<ChunkRecord>, RetrievalError> {
        match self.store.get(Namespace::OnchainProofs, id.as_slice())? {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Make sure a live copy of `id` is cached, or fail `SessionNotFound`.
    fn load(&self, id: &B256, now: u64) -> Result<(), RetrievalError> {
        let expires_at = match self.live.get(id).map(|s| s.expires_at) {
            Some(expires_at) => expires_at,
            None => {
                let bytes = self
                    .store
                    .get(Namespace::DownloadSessions, id.as_slice())?
                    .ok_or_else(|| not_found(id))?;
                let session: DownloadSession = decode(&bytes)?;
                let expires_at = session.expires_at;
                self.live.entry(*id).or_insert(session);
                debug!(%id, "Reloaded download session from store");
                expires_at
            }
        };

        if expires_at <= now {
            self.live.remove(id);
            self.store.delete(Namespace::DownloadSessions, id.as_slice())?;
            return Err(not_found(id));
        }
        Ok(())
    }

    fn persist(&self, session: &DownloadSession) -> Result<(), StorageError> {
        self.store.put(Namespace::DownloadSessions, session.id.as_slice(), &encode(session)?)
    }
}

pub(crate) fn covers(window_start: u64, window_len: u64, start: u64, len: u64) -> bool {
    if start < window_start {
        return false;
    }
    window_len == 0 || start.saturating_add(len) <= window_start.saturating_add(window_len)
}

fn not_found(id: &B256) -> RetrievalError {
    RetrievalError::SessionNotFound(format!("download session {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use slabd_api::{CommitmentEngine, OnChainSessionStatus};
    use slabd_commitment::ReferenceEngine;
    use slabd_primitives::Root;
    use slabd_storage::MemoryKvStore;

    const NOW: u64 = 1_700_000_000;

    fn window() -> DownloadWindow {
        DownloadWindow {
            deal: DealId(4),
            owner: Address::repeat_byte(1),
            provider: Address::repeat_byte(2),
            file_path: "big.bin".into(),
            start: 0,
            len: 1000,
        }
    }

    fn chunk(start: u64, len: u64) -> ChunkRecord {
        ChunkRecord { range_start: start, range_len: len, proof_hash: B256::repeat_byte(start as u8) }
    }

    fn manager(store: Arc<dyn KvStore>) -> DownloadSessions {
        DownloadSessions::new(store, Duration::from_secs(60))
    }

    #[test]
    fn test_open_append_close() {
        let sessions = manager(Arc::new(MemoryKvStore::new()));
        let session = sessions.open(window(), NOW).unwrap();

        assert_eq!(sessions.append_chunk(&session.id, chunk(0, 100), NOW).unwrap(), 1);
        assert_eq!(sessions.append_chunk(&session.id, chunk(100, 100), NOW).unwrap(), 2);
        assert_eq!(sessions.append_chunk(&session.id, chunk(200, 50), NOW).unwrap(), 3);

        let expected = merkle::chunk_root(&[chunk(0, 100), chunk(100, 100), chunk(200, 50)]);
        let receipt =
            DownloadReceipt { session_id: session.id, total_bytes: 250, chunk_root: expected };
        let closed = sessions.close(&receipt, NOW + 1).unwrap();
        assert_eq!(closed.chunks.len(), 3);

        assert_matches!(sessions.close(&receipt, NOW + 1), Err(RetrievalError::SessionNotFound(_)));
        assert_matches!(
            sessions.append_chunk(&session.id, chunk(250, 1), NOW),
            Err(RetrievalError::SessionNotFound(_))
        );
    }

    #[test]
    fn test_mismatched_receipt_keeps_session() {
        let sessions = manager(Arc::new(MemoryKvStore::new()));
        let session = sessions.open(window(), NOW).unwrap();
        sessions.append_chunk(&session.id, chunk(0, 100), NOW).unwrap();
        let root = merkle::chunk_root(&[chunk(0, 100)]);

        let short = DownloadReceipt { session_id: session.id, total_bytes: 99, chunk_root: root };
        assert_matches!(
            sessions.close(&short, NOW),
            Err(RetrievalError::ReceiptMismatch("total_bytes"))
        );
        let forged =
            DownloadReceipt { session_id: session.id, total_bytes: 100, chunk_root: B256::ZERO };
        assert_matches!(
            sessions.close(&forged, NOW),
            Err(RetrievalError::ReceiptMismatch("chunk_root"))
        );

        let good = DownloadReceipt { session_id: session.id, total_bytes: 100, chunk_root: root };
        sessions.close(&good, NOW).unwrap();
    }

    #[test]
    fn test_chunk_outside_window() {
        let sessions = manager(Arc::new(MemoryKvStore::new()));
        let session = sessions.open(DownloadWindow { start: 100, ..window() }, NOW).unwrap();

        assert_matches!(
            sessions.append_chunk(&session.id, chunk(50, 10), NOW),
            Err(RetrievalError::InvalidRequest(_))
        );
        assert_matches!(
            sessions.append_chunk(&session.id, chunk(1050, 60), NOW),
            Err(RetrievalError::InvalidRequest(_))
        );
        assert!(sessions.get(&session.id, NOW).unwrap().chunks.is_empty());
    }

    #[test]
    fn test_reload_after_restart() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let session = {
            let sessions = manager(store.clone());
            let session = sessions.open(window(), NOW).unwrap();
            sessions.append_chunk(&session.id, chunk(0, 10), NOW).unwrap();
            session
        };

        let restarted = manager(store);
        let reloaded = restarted.get(&session.id, NOW).unwrap();
        assert_eq!(reloaded.chunks, vec![chunk(0, 10)]);
    }

    #[test]
    fn test_evict_expired() {
        let store = Arc::new(MemoryKvStore::new());
        let sessions = manager(store.clone());
        let old = sessions.open(window(), NOW).unwrap();
        let fresh = sessions.open(window(), NOW + 50).unwrap();

        assert_eq!(sessions.evict_expired(NOW + 60).unwrap(), 1);
        assert_matches!(sessions.get(&old.id, NOW + 60), Err(RetrievalError::SessionNotFound(_)));
        sessions.get(&fresh.id, NOW + 60).unwrap();
        assert_eq!(store.len(Namespace::DownloadSessions), 1);
    }

    #[test]
    fn test_onchain_chunks_accumulate() {
        let sessions = manager(Arc::new(MemoryKvStore::new()));
        let onchain = OnChainSession {
            id: B256::repeat_byte(9),
            deal: DealId(4),
            owner: Address::repeat_byte(1),
            provider: Address::repeat_byte(2),
            content_root: ReferenceEngine::new().aggregate(&[Root::ZERO]).unwrap().commitment,
            file_path: "big.bin".into(),
            range_start: 0,
            range_len: 500,
            expires_at: NOW + 60,
            status: OnChainSessionStatus::Open,
        };

        assert_eq!(sessions.append_onchain_chunk(&onchain, chunk(0, 100)).unwrap(), 1);
        assert_eq!(sessions.append_onchain_chunk(&onchain, chunk(100, 100)).unwrap(), 2);
        assert_matches!(
            sessions.append_onchain_chunk(&onchain, chunk(450, 100)),
            Err(RetrievalError::InvalidRequest(_))
        );
        assert_eq!(sessions.onchain_chunks(&onchain.id).unwrap(), vec![chunk(0, 100), chunk(100, 100)]);
        assert!(sessions.onchain_chunks(&B256::ZERO).unwrap().is_empty());
    }
}
