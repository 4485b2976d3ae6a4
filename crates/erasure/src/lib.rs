//! Erasure reconstruction of user-data units.
//!
//! An erasure-coded slab keeps user-data units only as per-slot shards
//! (`mdu_<n>_slot_<s>.bin`). Before such a unit can be read or proven, the
//! [`Reconstructor`] rebuilds `mdu_<n>.bin` from any K of the K+M shards:
//! local shards first, then the slot's provider, in slot order so data shards
//! are preferred over parity.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use metrics::Counter;
use slabd_api::{CommitmentEngine, EngineError, ProviderClient, ProviderError, SlabTarget};
use slabd_discovery::{DiscoveryError, MAX_BACKOFF, ProviderDiscovery};
use slabd_primitives::{CommitmentId, DealId, ErrorKind, StripeError, StripeParams, constants::MDU_SIZE};
use slabd_slab::{SlabError, SlabIndex, layout};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from unit reconstruction.
#[derive(Debug, thiserror::Error)]
pub enum ReconstructError {
    /// Fewer than K shards could be obtained.
    #[error("unit {unit_index}: have {have} shards, need {need}")]
    InsufficientShards {
        /// Unit being rebuilt.
        unit_index: u64,
        /// Shards obtained.
        have: usize,
        /// Shards required (K).
        need: usize,
    },

    /// The unit file is missing and the deal stores whole units.
    #[error("unit {0} is missing and the deal is not erasure coded")]
    MissingUnit(u64),

    /// Deal service parameters are malformed.
    #[error(transparent)]
    Stripe(#[from] StripeError),

    /// Ledger lookup failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The engine rejected the shards.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Unit #0 is unreadable or disagrees with the rebuilt unit.
    #[error(transparent)]
    Slab(#[from] SlabError),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("reconstruction task failed: {0}")]
    Task(String),
}

impl ReconstructError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconstructError::InsufficientShards { .. } => ErrorKind::InsufficientShards,
            ReconstructError::MissingUnit(_) => ErrorKind::NotFound,
            ReconstructError::Stripe(_) => ErrorKind::InvalidRequest,
            ReconstructError::Discovery(e) => e.kind(),
            ReconstructError::Engine(e) => e.kind(),
            ReconstructError::Slab(e) => e.kind(),
            ReconstructError::Io(_) | ReconstructError::Task(_) => ErrorKind::Internal,
        }
    }
}

/// Peer fetch tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructConfig {
    /// Retries per slot after the first attempt, for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles up to [`MAX_BACKOFF`].
    pub initial_backoff: Duration,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self { max_retries: 2, initial_backoff: Duration::from_millis(100) }
    }
}

#[derive(Clone, Debug)]
struct ReconstructMetrics {
    units_rebuilt: Counter,
    local_shards: Counter,
    peer_shards: Counter,
    peer_failures: Counter,
    insufficient: Counter,
}

impl Default for ReconstructMetrics {
    fn default() -> Self {
        Self {
            units_rebuilt: metrics::counter!("slabd.reconstruct.units_rebuilt"),
            local_shards: metrics::counter!("slabd.reconstruct.local_shards"),
            peer_shards: metrics::counter!("slabd.reconstruct.peer_shards"),
            peer_failures: metrics::counter!("slabd.reconstruct.peer_failures"),
            insufficient: metrics::counter!("slabd.reconstruct.insufficient_shards"),
        }
    }
}

/// Rebuilds missing user-data units of erasure-coded slabs.
pub struct Reconstructor {
    engine: Arc<dyn CommitmentEngine>,
    client: Arc<dyn ProviderClient>,
    discovery: Arc<ProviderDiscovery>,
    config: ReconstructConfig,
    inflight: DashMap<PathBuf, Arc<Mutex<()>>>,
    metrics: ReconstructMetrics,
}

impl std::fmt::Debug for Reconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconstructor")
            .field("config", &self.config)
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}

impl Reconstructor {
    /// Create a reconstructor.
    pub fn new(
        engine: Arc<dyn CommitmentEngine>,
        client: Arc<dyn ProviderClient>,
        discovery: Arc<ProviderDiscovery>,
        config: ReconstructConfig,
    ) -> Self {
        Self {
            engine,
            client,
            discovery,
            config,
            inflight: DashMap::new(),
            metrics: ReconstructMetrics::default(),
        }
    }

    /// Make sure `mdu_<unit_index>.bin` exists in `dir`, rebuilding it from
    /// shards if needed. Stripe parameters come from the deal.
    pub async fn ensure_unit_on_disk(
        &self,
        deal: DealId,
        id: &CommitmentId,
        unit_index: u64,
        dir: &Path,
    ) -> Result<PathBuf, ReconstructError> {
        let path = layout::unit_path(dir, unit_index);
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        let params = self.discovery.deal(deal).await?.stripe_params()?;
        self.ensure_unit_with(SlabTarget::new(deal, *id), &params, unit_index, dir).await
    }

    /// Like [`Reconstructor::ensure_unit_on_disk`] with stripe parameters the
    /// caller already holds.
    pub async fn ensure_unit_with(
        &self,
        target: SlabTarget,
        params: &StripeParams,
        unit_index: u64,
        dir: &Path,
    ) -> Result<PathBuf, ReconstructError> {
        let path = layout::unit_path(dir, unit_index);
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        if !params.is_erasure() {
            return Err(ReconstructError::MissingUnit(unit_index));
        }

        let lock = self.inflight.entry(path.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            // Another caller may have finished while we waited.
            if tokio::fs::try_exists(&path).await? {
                Ok(path.clone())
            } else {
                self.rebuild(target, params, unit_index, dir, &path).await
            }
        };
        drop(lock);
        self.inflight.remove_if(&path, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn rebuild(
        &self,
        target: SlabTarget,
        params: &StripeParams,
        unit_index: u64,
        dir: &Path,
        path: &Path,
    ) -> Result<PathBuf, ReconstructError> {
        let (k, m) = (params.k, params.m);
        let slots = params.slots();
        let shard_size = params.shard_size();

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; slots];
        let mut have = 0;
        for (slot, shard) in shards.iter_mut().enumerate() {
            let shard_path = layout::shard_path(dir, unit_index, slot);
            match tokio::fs::read(&shard_path).await {
                Ok(data) if data.len() == shard_size => {
                    *shard = Some(data);
                    have += 1;
                }
                Ok(data) => {
                    warn!(
                        path = %shard_path.display(),
                        len = data.len(),
                        expected = shard_size,
                        "Ignoring local shard of wrong size"
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.metrics.local_shards.increment(have as u64);
        debug!(slab = %target.commitment, unit_index, have, need = k, "Collected local shards");

        for slot in 0..slots {
            if have >= k {
                break;
            }
            if shards[slot].is_some() {
                continue;
            }
            if let Some(data) = self.fetch_from_peer(&target, unit_index, slot, shard_size).await {
                shards[slot] = Some(data);
                have += 1;
                self.metrics.peer_shards.increment(1);
            }
        }

        if have < k {
            self.metrics.insufficient.increment(1);
            warn!(slab = %target.commitment, unit_index, have, need = k, "Not enough shards to rebuild unit");
            return Err(ReconstructError::InsufficientShards { unit_index, have, need: k });
        }

        let engine = self.engine.clone();
        let out = path.to_path_buf();
        let (dir, params) = (dir.to_path_buf(), *params);
        tokio::task::spawn_blocking(move || -> Result<(), ReconstructError> {
            let index = SlabIndex::load(&dir)?;
            index.check_params(&params)?;
            let unit = engine.reconstruct(shards, k, m)?;
            if unit.len() != MDU_SIZE {
                return Err(EngineError::InvalidInput(format!(
                    "reconstructed unit is {} bytes",
                    unit.len()
                ))
                .into());
            }
            check_root(engine.as_ref(), &index, unit_index, &unit)?;
            layout::write_atomic(&out, &unit)?;
            Ok(())
        })
        .await
        .map_err(|e| ReconstructError::Task(e.to_string()))??;

        self.metrics.units_rebuilt.increment(1);
        info!(slab = %target.commitment, unit_index, "Rebuilt unit from shards");
        Ok(path.to_path_buf())
    }

    /// Fetch one shard from the provider of `slot`. Failures are logged and
    /// turn into `None`; the slot is simply skipped.
    async fn fetch_from_peer(
        &self,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
        shard_size: usize,
    ) -> Option<Vec<u8>> {
        let provider = match self.discovery.slot_provider(target.deal, slot).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(deal = %target.deal, slot, error = %e, "No provider for slot");
                return None;
            }
        };
        let endpoint = match self.discovery.resolve_endpoint(&provider).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(%provider, slot, error = %e, "No endpoint for slot provider");
                return None;
            }
        };

        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;
        loop {
            match self.client.fetch_shard(&endpoint, target, unit_index, slot).await {
                Ok(data) if data.len() == shard_size => return Some(data.to_vec()),
                Ok(data) => {
                    warn!(%provider, slot, len = data.len(), "Peer returned shard of wrong size");
                    self.metrics.peer_failures.increment(1);
                    return None;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(%provider, slot, attempt, error = %e, ?backoff, "Shard fetch failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    if matches!(e, ProviderError::Transient(_)) {
                        self.discovery.invalidate_endpoint(&provider);
                    }
                    debug!(%provider, slot, error = %e, "Shard unavailable from peer");
                    self.metrics.peer_failures.increment(1);
                    return None;
                }
            }
        }
    }
}

/// A rebuilt unit must hash to its entry in the root table. A slab without a
/// root table has nothing to compare against.
fn check_root(
    engine: &dyn CommitmentEngine,
    index: &SlabIndex,
    unit_index: u64,
    unit: &[u8],
) -> Result<(), ReconstructError> {
    if index.roots().is_empty() {
        return Ok(());
    }
    let expected = index.unit_root(unit_index).ok_or_else(|| {
        SlabError::InvalidLayout(format!("root table has no entry for unit {unit_index}"))
    })?;
    let actual = engine.commit_unit(unit)?.root;
    if actual != expected {
        warn!(unit_index, %expected, %actual, "Rebuilt unit does not match its root");
        return Err(SlabError::InvalidLayout(format!(
            "rebuilt unit {unit_index} has root {actual}, root table says {expected}"
        ))
        .into());
    }
    Ok(())
}
