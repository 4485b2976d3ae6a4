//! Erasure-coded ingest.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use slabd_api::{CommitmentEngine, EngineError, ProviderClient, ProviderError, SlabTarget};
use slabd_discovery::ProviderDiscovery;
use slabd_primitives::{DealId, StripeParams, constants::MDU_SIZE};
use slabd_slab::{SlabDirs, Unit0Builder, layout, payload};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::{
    IngestConfig, IngestError, IngestMetrics, IngestRequest, IngestResult,
    build::{self, UserUnit},
    check_request,
    pool::run_bounded,
    staging::{self, Published, StagingDir},
    with_deadline,
};

/// Erasure-mode encoder.
///
/// The local slab holds unit #0, the witness units, the manifest and every
/// shard. Providers receive the metadata on every slot and their own shards.
pub struct ErasureIngest {
    engine: Arc<dyn CommitmentEngine>,
    dirs: SlabDirs,
    discovery: Arc<ProviderDiscovery>,
    client: Arc<dyn ProviderClient>,
    config: IngestConfig,
    metrics: IngestMetrics,
}

impl std::fmt::Debug for ErasureIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureIngest")
            .field("root", &self.dirs.root())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ErasureIngest {
    /// Create an encoder.
    pub fn new(
        engine: Arc<dyn CommitmentEngine>,
        dirs: SlabDirs,
        discovery: Arc<ProviderDiscovery>,
        client: Arc<dyn ProviderClient>,
        config: IngestConfig,
    ) -> Self {
        Self { engine, dirs, discovery, client, config, metrics: IngestMetrics::new("erasure") }
    }

    /// Store one file as a new erasure-coded slab.
    ///
    /// If the resulting slab is already published locally, it is returned as
    /// is: nothing is rewritten and nothing is uploaded.
    pub async fn ingest(
        &self,
        deal: DealId,
        params: &StripeParams,
        request: IngestRequest,
    ) -> Result<IngestResult, IngestError> {
        with_deadline(self.config.timeout, &self.metrics, self.run(deal, *params, request)).await
    }

    async fn run(
        &self,
        deal: DealId,
        params: StripeParams,
        request: IngestRequest,
    ) -> Result<IngestResult, IngestError> {
        if !params.is_erasure() {
            return Err(IngestError::InvalidRequest(
                "erasure ingest needs erasure stripe parameters".into(),
            ));
        }
        check_request(&request)?;

        let mut builder = Unit0Builder::new();
        let record = builder.add_file(
            &request.path,
            request.data.len() as u64,
            request.flags,
            request.timestamp,
        )?;
        let user_units = builder.user_unit_count();
        let witness_count = params.witness_count(user_units);
        debug!(%deal, k = params.k, m = params.m, user_units, witness_count, "Encoding erasure slab");

        let staging = StagingDir::create(&self.dirs, deal)?;
        let staged = staging.path().to_path_buf();
        let engine = self.engine.clone();
        let data = request.data.clone();
        let start = record.start;
        let (k, m) = (params.k, params.m);
        let units = run_bounded(self.config.parallelism, user_units, move |u| {
            let mut unit = vec![0u8; MDU_SIZE];
            payload::encode_file_into(&mut unit, u, start, &data)?;
            let root = engine.commit_unit(&unit)?.root;
            let expansion = engine.expand_erasure(&unit, k, m)?;
            if expansion.shards.len() != k + m {
                return Err(EngineError::InvalidInput(format!(
                    "expansion produced {} shards, expected {}",
                    expansion.shards.len(),
                    k + m
                ))
                .into());
            }
            let unit_index = 1 + witness_count + u;
            for (slot, shard) in expansion.shards.iter().enumerate() {
                layout::write_atomic(&layout::shard_path(&staged, unit_index, slot), shard)?;
            }
            Ok(UserUnit { root, witness: expansion.witness })
        })
        .await?;
        self.metrics.units_encoded.increment(user_units);

        let engine = self.engine.clone();
        let staged = staging.path().to_path_buf();
        let assembled = tokio::task::spawn_blocking(move || {
            build::assemble(engine.as_ref(), &staged, builder, &units, witness_count)
        })
        .await??;

        let dir = self.dirs.resolve(&assembled.commitment, Some(deal))?;
        let result = IngestResult {
            commitment: assembled.commitment,
            dir: dir.clone(),
            witness_count,
            user_units,
            file: record,
            already_published: false,
        };

        if staging::is_published(&dir) {
            self.metrics.slabs_reused.increment(1);
            info!(%deal, slab = %result.commitment, "Erasure slab already published");
            return Ok(IngestResult { already_published: true, ..result });
        }

        let target = SlabTarget::new(deal, assembled.commitment);
        self.upload(target, staging.path(), &params, witness_count, user_units).await?;

        let published = staging.publish(&dir)?;
        self.metrics.bytes_ingested.increment(result.file.length);
        match published {
            Published::Renamed => self.metrics.slabs_published.increment(1),
            Published::AlreadyPresent => self.metrics.slabs_reused.increment(1),
        }
        info!(
            %deal,
            slab = %result.commitment,
            path = %result.file.path,
            bytes = result.file.length,
            user_units,
            witness_count,
            slots = params.slots(),
            "Published erasure slab"
        );
        Ok(IngestResult { already_published: published == Published::AlreadyPresent, ..result })
    }

    /// One task per slot: metadata to every slot, shards to their own slot.
    async fn upload(
        &self,
        target: SlabTarget,
        staged: &Path,
        params: &StripeParams,
        witness_count: u64,
        user_units: u64,
    ) -> Result<(), IngestError> {
        let mut metadata = Vec::with_capacity(1 + witness_count as usize);
        for n in 0..=witness_count {
            let unit = tokio::fs::read(layout::unit_path(staged, n)).await?;
            metadata.push((n, Bytes::from(unit)));
        }
        let metadata = Arc::new(metadata);
        let manifest = Bytes::from(tokio::fs::read(layout::manifest_path(staged)).await?);

        let mut set = JoinSet::new();
        for slot in 0..params.slots() {
            let slot_upload = SlotUpload {
                target,
                slot,
                staged: staged.to_path_buf(),
                first_user_unit: 1 + witness_count,
                user_units,
                metadata: metadata.clone(),
                manifest: manifest.clone(),
            };
            let discovery = self.discovery.clone();
            let client = self.client.clone();
            let shards_uploaded = self.metrics.shards_uploaded.clone();
            set.spawn(async move {
                let uploaded = slot_upload.run(&discovery, client.as_ref()).await?;
                shards_uploaded.increment(uploaded);
                Ok::<_, IngestError>(())
            });
        }

        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => e.into(),
            };
            set.abort_all();
            return Err(failure);
        }
        Ok(())
    }
}

struct SlotUpload {
    target: SlabTarget,
    slot: usize,
    staged: PathBuf,
    first_user_unit: u64,
    user_units: u64,
    metadata: Arc<Vec<(u64, Bytes)>>,
    manifest: Bytes,
}

impl SlotUpload {
    /// Returns the number of shards sent.
    async fn run(
        self,
        discovery: &ProviderDiscovery,
        client: &dyn ProviderClient,
    ) -> Result<u64, IngestError> {
        let slot = self.slot;
        let failed = |source: ProviderError| IngestError::Upload { slot, source };
        let endpoint = discovery.slot_endpoint(self.target.deal, slot).await?;

        for (n, unit) in self.metadata.iter() {
            client.upload_unit(&endpoint, &self.target, *n, unit.clone()).await.map_err(failed)?;
        }
        client
            .upload_manifest_blob(&endpoint, &self.target, self.manifest)
            .await
            .map_err(failed)?;

        for u in 0..self.user_units {
            let unit_index = self.first_user_unit + u;
            let shard = tokio::fs::read(layout::shard_path(&self.staged, unit_index, slot)).await?;
            client
                .upload_shard(&endpoint, &self.target, unit_index, slot, Bytes::from(shard))
                .await
                .map_err(failed)?;
        }
        debug!(slab = %self.target.commitment, slot, %endpoint, shards = self.user_units, "Slot upload complete");
        Ok(self.user_units)
    }
}
