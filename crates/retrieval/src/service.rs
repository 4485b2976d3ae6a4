//! Fetch orchestration.

use std::{fs, io::Read, path::Path, sync::Arc};

use alloy_primitives::{Address, B256, keccak256};
use bytes::Bytes;
use slabd_api::{CommitmentEngine, Deal, OnChainSession, OnChainSessionStatus, ProofRequest, SlabTarget};
use slabd_discovery::ProviderDiscovery;
use slabd_erasure::{ReconstructError, Reconstructor};
use slabd_primitives::{CommitmentId, DealId};
use slabd_slab::{Segment, SlabDirs, SlabError, SlabIndex, SlabIndexCache, layout, resolve_segment};
use slabd_storage::KvStore;
use tracing::debug;

use crate::{
    Authorizer, ChunkRecord, DownloadReceipt, DownloadSession, DownloadSessions, DownloadWindow,
    FetchReceipt, FetchSession, FetchSessions, ReplayGuard, RetrievalConfig, RetrievalError,
    RetrievalMetrics, RetrievalRequest, SignedRange, download::covers, fetch::ServedRange, headers, unix_now,
};

/// Session a fetch is served under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRef {
    /// Locally minted download session.
    Download(B256),
    /// Session issued by the ledger.
    OnChain(B256),
}

/// A byte-range fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Commitment identifier as it appeared in the request path.
    pub commitment: String,
    /// Deal the slab belongs to.
    pub deal: DealId,
    /// Claimed deal owner.
    pub owner: Address,
    /// File path inside the slab.
    pub file_path: String,
    /// First byte, relative to the file.
    pub range_start: u64,
    /// Length; 0 means to end of file.
    pub range_len: u64,
    /// Owner signature over the range.
    pub signed: Option<SignedRange>,
    /// Session to account the range under.
    pub session: Option<SessionRef>,
}

impl FetchRequest {
    /// Whole-file request without signature or session.
    pub fn new(
        commitment: impl Into<String>,
        deal: DealId,
        owner: Address,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            commitment: commitment.into(),
            deal,
            owner,
            file_path: file_path.into(),
            range_start: 0,
            range_len: 0,
            signed: None,
            session: None,
        }
    }

    /// Restrict to `[start, start + len)`.
    pub fn with_range(mut self, start: u64, len: u64) -> Self {
        self.range_start = start;
        self.range_len = len;
        self
    }

    /// Attach an owner signature.
    pub fn with_signature(mut self, signed: SignedRange) -> Self {
        self.signed = Some(signed);
        self
    }

    /// Serve under a session.
    pub fn with_session(mut self, session: SessionRef) -> Self {
        self.session = Some(session);
        self
    }

    /// Typed data the owner signs for this request.
    pub fn typed(&self, nonce: u64, expires_at: u64) -> RetrievalRequest {
        RetrievalRequest::new(
            self.deal,
            &self.file_path,
            self.range_start,
            self.range_len,
            nonce,
            expires_at,
        )
    }
}

/// Served bytes plus their proof and accounting ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Served bytes.
    pub data: Bytes,
    /// Chained proof of the blob holding the range.
    pub proof: Bytes,
    /// `keccak256(proof)`.
    pub proof_hash: B256,
    /// Slab commitment.
    pub commitment: CommitmentId,
    /// Unit holding the range.
    pub unit_index: u64,
    /// Blob holding the range.
    pub blob_index: usize,
    /// First served byte, relative to the file.
    pub range_start: u64,
    /// Bytes served.
    pub served_len: u64,
    /// Full file length.
    pub file_len: u64,
    /// Ticket to acknowledge with a [`FetchReceipt`].
    pub fetch_session: Option<B256>,
    /// Session the chunk was logged under.
    pub download_session: Option<B256>,
}

impl FetchResponse {
    /// Response metadata as name/value pairs.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (headers::PROOF, hex::encode(&self.proof)),
            (headers::RANGE_START, self.range_start.to_string()),
            (headers::SERVED_LEN, self.served_len.to_string()),
            (headers::FILE_LEN, self.file_len.to_string()),
        ];
        if let Some(id) = self.fetch_session {
            out.push((headers::FETCH_SESSION, id.to_string()));
        }
        if let Some(id) = self.download_session {
            out.push((headers::DOWNLOAD_SESSION, id.to_string()));
        }
        out
    }
}

/// Request to open a download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDownload {
    /// Commitment identifier as it appeared in the request path.
    pub commitment: String,
    /// Deal.
    pub deal: DealId,
    /// Claimed deal owner.
    pub owner: Address,
    /// File path.
    pub file_path: String,
    /// First byte of the window.
    pub window_start: u64,
    /// Window length; 0 means to end of file.
    pub window_len: u64,
    /// Owner signature over the window.
    pub signed: Option<SignedRange>,
}

/// Collaborators of [`RetrievalService`].
#[derive(Clone)]
pub struct RetrievalDeps {
    /// Proof generator.
    pub engine: Arc<dyn CommitmentEngine>,
    /// Local slab directories.
    pub dirs: SlabDirs,
    /// Ledger access.
    pub discovery: Arc<ProviderDiscovery>,
    /// Rebuilds missing erasure-coded units.
    pub reconstructor: Arc<Reconstructor>,
    /// Durable session store.
    pub store: Arc<dyn KvStore>,
    /// Address this node serves as.
    pub provider: Address,
}

/// How a served range is accounted.
enum Accounting {
    Ticket,
    Download(Box<DownloadSession>),
    OnChain(Box<OnChainSession>),
    Untracked,
}

impl Accounting {
    /// Reject a served range the session does not cover.
    fn check_window(&self, start: u64, len: u64) -> Result<(), RetrievalError> {
        let inside = match self {
            Self::Download(session) => session.covers(start, len),
            Self::OnChain(session) => covers(session.range_start, session.range_len, start, len),
            Self::Ticket | Self::Untracked => true,
        };
        if inside {
            Ok(())
        } else {
            Err(RetrievalError::InvalidRequest(format!(
                "chunk [{start}, +{len}) is outside the session window"
            )))
        }
    }
}

struct Served {
    data: Vec<u8>,
    proof: Vec<u8>,
}

/// Serves authorized, proof-carrying byte ranges.
pub struct RetrievalService {
    engine: Arc<dyn CommitmentEngine>,
    dirs: SlabDirs,
    discovery: Arc<ProviderDiscovery>,
    reconstructor: Arc<Reconstructor>,
    provider: Address,
    indexes: Arc<SlabIndexCache>,
    authorizer: Authorizer,
    replay: ReplayGuard,
    tickets: FetchSessions,
    downloads: DownloadSessions,
    config: RetrievalConfig,
    metrics: RetrievalMetrics,
}

impl std::fmt::Debug for RetrievalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalService")
            .field("root", &self.dirs.root())
            .field("provider", &self.provider)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetrievalService {
    /// Create a service.
    pub fn new(deps: RetrievalDeps, config: RetrievalConfig) -> Self {
        Self {
            engine: deps.engine,
            dirs: deps.dirs,
            discovery: deps.discovery,
            reconstructor: deps.reconstructor,
            provider: deps.provider,
            indexes: Arc::new(SlabIndexCache::new()),
            authorizer: Authorizer::new(config.chain_id, config.require_signatures),
            replay: ReplayGuard::new(deps.store.clone(), config.max_expiry_window),
            tickets: FetchSessions::new(deps.store.clone(), config.session_ttl),
            downloads: DownloadSessions::new(deps.store, config.session_ttl),
            config,
            metrics: RetrievalMetrics::default(),
        }
    }

    /// Signing domain and gate.
    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Fetch tickets.
    pub fn fetch_sessions(&self) -> &FetchSessions {
        &self.tickets
    }

    /// Download sessions.
    pub fn downloads(&self) -> &DownloadSessions {
        &self.downloads
    }

    /// Serve a range now.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, RetrievalError> {
        self.fetch_at(request, unix_now()).await
    }

    /// Serve a range at the given Unix time.
    pub async fn fetch_at(
        &self,
        request: FetchRequest,
        now: u64,
    ) -> Result<FetchResponse, RetrievalError> {
        let deal = request.deal;
        let path = request.file_path.clone();
        let result = self.serve(request, now).await;
        match &result {
            Ok(response) => {
                self.metrics.fetches.increment(1);
                self.metrics.bytes_served.increment(response.served_len);
            }
            Err(e) => {
                self.metrics.rejected.increment(1);
                debug!(%deal, %path, kind = %e.kind(), error = %e, "Fetch rejected");
            }
        }
        result
    }

    /// Open a download session over a window of one file.
    pub async fn open_download(
        &self,
        request: OpenDownload,
        now: u64,
    ) -> Result<DownloadSession, RetrievalError> {
        let id = CommitmentId::parse(&request.commitment).map_err(SlabError::from)?;
        let deal = self.discovery.deal(request.deal).await?;
        let typed = request.signed.as_ref().map(|signed| {
            RetrievalRequest::new(
                request.deal,
                &request.file_path,
                request.window_start,
                request.window_len,
                signed.nonce,
                signed.expires_at,
            )
        });
        self.authorize(&deal, &id, &request.owner, typed.as_ref(), request.signed.as_ref())?;

        let dir = self.dirs.resolve_existing(&id, Some(request.deal))?;
        let index = self.index(&dir).await?;
        let entry = index.lookup(&request.file_path)?;
        if request.window_start >= entry.length {
            return Err(RetrievalError::InvalidRequest(format!(
                "window starts at {} past the end of {} ({} bytes)",
                request.window_start, request.file_path, entry.length
            )));
        }
        self.record_nonce(&deal, &request.owner, request.signed.as_ref(), now)?;

        self.downloads.open(
            DownloadWindow {
                deal: request.deal,
                owner: request.owner,
                provider: self.provider,
                file_path: request.file_path,
                start: request.window_start,
                len: request.window_len,
            },
            now,
        )
    }

    /// Consume a fetch ticket.
    pub fn submit_fetch_receipt(
        &self,
        receipt: &FetchReceipt,
        now: u64,
    ) -> Result<FetchSession, RetrievalError> {
        let session = self.tickets.consume(receipt, now)?;
        self.metrics.tickets_consumed.increment(1);
        Ok(session)
    }

    /// Close a download session.
    pub fn close_download(
        &self,
        receipt: &DownloadReceipt,
        now: u64,
    ) -> Result<DownloadSession, RetrievalError> {
        let session = self.downloads.close(receipt, now)?;
        self.metrics.sessions_closed.increment(1);
        Ok(session)
    }

    /// Drop expired tickets, sessions and nonces. Returns how many entries went.
    pub fn evict_expired(&self, now: u64) -> Result<usize, RetrievalError> {
        Ok(self.tickets.evict_expired(now)?
            + self.downloads.evict_expired(now)?
            + self.replay.prune(now)?)
    }

    async fn serve(&self, request: FetchRequest, now: u64) -> Result<FetchResponse, RetrievalError> {
        let id = CommitmentId::parse(&request.commitment).map_err(SlabError::from)?;
        let deal = self.discovery.deal(request.deal).await?;
        let typed = request.signed.as_ref().map(|s| request.typed(s.nonce, s.expires_at));
        self.authorize(&deal, &id, &request.owner, typed.as_ref(), request.signed.as_ref())?;
        let accounting = self.accounting(&request, &deal, &id, now).await?;

        let dir = self.dirs.resolve_existing(&id, Some(request.deal))?;
        let index = self.index(&dir).await?;
        let params = deal.stripe_params().map_err(ReconstructError::from)?;
        index.check_params(&params)?;
        let segment = resolve_segment(
            &dir,
            &index,
            &request.file_path,
            request.range_start,
            request.range_len,
        )?;
        segment.check_single_blob()?;
        accounting.check_window(segment.range_start, segment.served_len)?;
        self.record_nonce(&deal, &request.owner, request.signed.as_ref(), now)?;

        self.reconstructor
            .ensure_unit_with(SlabTarget::new(request.deal, id), &params, segment.unit_index, &dir)
            .await?;

        let (unit_index, blob_index) = (segment.unit_index, segment.blob_index());
        let (range_start, served_len, file_len) =
            (segment.range_start, segment.served_len, segment.file_len);
        let engine = self.engine.clone();
        let served =
            tokio::task::spawn_blocking(move || read_and_prove(engine.as_ref(), &dir, segment))
                .await??;
        let proof_hash = keccak256(&served.proof);
        debug!(
            deal = %request.deal,
            slab = %id,
            path = %request.file_path,
            range_start,
            served_len,
            unit_index,
            blob_index,
            "Served range"
        );

        let chunk = ChunkRecord { range_start, range_len: served_len, proof_hash };
        let (fetch_session, download_session) = match accounting {
            Accounting::Download(session) => {
                self.downloads.append_chunk(&session.id, chunk, now)?;
                self.metrics.chunks_logged.increment(1);
                (None, Some(session.id))
            }
            Accounting::OnChain(session) => {
                self.downloads.append_onchain_chunk(&session, chunk)?;
                self.metrics.chunks_logged.increment(1);
                (None, Some(session.id))
            }
            Accounting::Ticket => {
                let epoch = self.discovery.current_epoch().await?;
                let ticket = self.tickets.create(
                    ServedRange {
                        deal: request.deal,
                        epoch,
                        provider: self.provider,
                        file_path: request.file_path,
                        range_start: request.range_start,
                        range_len: request.range_len,
                        bytes_served: served_len,
                        proof_hash,
                    },
                    now,
                )?;
                self.metrics.tickets_created.increment(1);
                (Some(ticket.id), None)
            }
            Accounting::Untracked => (None, None),
        };

        Ok(FetchResponse {
            data: Bytes::from(served.data),
            proof: Bytes::from(served.proof),
            proof_hash,
            commitment: id,
            unit_index,
            blob_index,
            range_start,
            served_len,
            file_len,
            fetch_session,
            download_session,
        })
    }

    /// Owner, content root, then the signature when present.
    ///
    /// The nonce is left unrecorded; callers record it with
    /// [`Self::record_nonce`] once the request has passed every other check.
    fn authorize(
        &self,
        deal: &Deal,
        id: &CommitmentId,
        owner: &Address,
        typed: Option<&RetrievalRequest>,
        signed: Option<&SignedRange>,
    ) -> Result<(), RetrievalError> {
        self.authorizer.check_deal(deal, id, owner)?;
        match (typed, signed) {
            (Some(typed), Some(signed)) => {
                self.authorizer.verify_signature(&deal.owner, typed, &signed.signature)
            }
            _ if self.authorizer.require_signatures() => {
                Err(RetrievalError::Unauthorized("request signature required".into()))
            }
            _ => Ok(()),
        }
    }

    /// Consume the nonce of a signed request. Runs last so a request rejected
    /// for its range or session leaves the owner's nonce unused.
    fn record_nonce(
        &self,
        deal: &Deal,
        owner: &Address,
        signed: Option<&SignedRange>,
        now: u64,
    ) -> Result<(), RetrievalError> {
        match signed {
            Some(signed) => {
                self.replay.check_and_record(deal.id, owner, signed.nonce, signed.expires_at, now)
            }
            None => Ok(()),
        }
    }

    /// Validate the session a request names before anything is read.
    ///
    /// Only the range start is checked here; the served length is known once
    /// the segment resolves, and [`Accounting::check_window`] runs again then.
    async fn accounting(
        &self,
        request: &FetchRequest,
        deal: &Deal,
        id: &CommitmentId,
        now: u64,
    ) -> Result<Accounting, RetrievalError> {
        match request.session {
            Some(SessionRef::Download(session_id)) => {
                let session = self.downloads.get(&session_id, now)?;
                if session.deal != request.deal
                    || session.owner != request.owner
                    || session.file_path != request.file_path
                {
                    return Err(RetrievalError::Unauthorized(format!(
                        "download session {session_id} does not cover this request"
                    )));
                }
                let accounting = Accounting::Download(Box::new(session));
                accounting.check_window(request.range_start, 0)?;
                Ok(accounting)
            }
            Some(SessionRef::OnChain(session_id)) => {
                let session = self.discovery.retrieval_session(&session_id).await?;
                if session.status != OnChainSessionStatus::Open || session.expires_at <= now {
                    return Err(RetrievalError::SessionNotFound(format!(
                        "on-chain session {session_id} is {}",
                        session.status
                    )));
                }
                if session.content_root != *id {
                    return Err(RetrievalError::Conflict {
                        expected: Some(session.content_root),
                        actual: *id,
                    });
                }
                if session.deal != deal.id
                    || session.owner != request.owner
                    || session.provider != self.provider
                    || session.file_path != request.file_path
                {
                    return Err(RetrievalError::Unauthorized(format!(
                        "on-chain session {session_id} does not cover this request"
                    )));
                }
                let accounting = Accounting::OnChain(Box::new(session));
                accounting.check_window(request.range_start, 0)?;
                Ok(accounting)
            }
            None if self.config.fetch_tickets => Ok(Accounting::Ticket),
            None => Ok(Accounting::Untracked),
        }
    }

    async fn index(&self, dir: &Path) -> Result<Arc<SlabIndex>, RetrievalError> {
        let indexes = self.indexes.clone();
        let dir = dir.to_path_buf();
        Ok(tokio::task::spawn_blocking(move || indexes.get(&dir)).await??)
    }
}

fn read_and_prove(
    engine: &dyn CommitmentEngine,
    dir: &Path,
    mut segment: Segment,
) -> Result<Served, RetrievalError> {
    let mut data = Vec::with_capacity(segment.served_len as usize);
    segment.reader.read_to_end(&mut data)?;
    if data.len() as u64 != segment.served_len {
        return Err(SlabError::InvalidLayout(format!(
            "read {} of {} bytes from unit {}",
            data.len(),
            segment.served_len,
            segment.unit_index
        ))
        .into());
    }

    let unit = fs::read(&segment.unit_path)?;
    let manifest = fs::read(layout::manifest_path(dir))?;
    let proof = engine.prove_chain(&ProofRequest {
        manifest: &manifest,
        root_index: segment.unit_index as usize,
        unit: &unit,
        blob_index: segment.blob_index(),
    })?;
    Ok(Served { data, proof })
}
