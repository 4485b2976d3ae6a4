//! Plain-mode ingest: whole user units, kept locally.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use slabd_api::CommitmentEngine;
use slabd_primitives::{
    CommitmentId, DealId,
    constants::{MDU_SIZE, plain_witness_count},
};
use slabd_slab::{FileSpan, SlabDirs, SlabError, SlabIndex, Unit0Builder, layout, payload};
use tracing::{debug, info};

use crate::{
    IngestConfig, IngestError, IngestMetrics, IngestRequest, IngestResult,
    build::{self, UserUnit},
    check_request,
    pool::run_bounded,
    staging::{Published, StagingDir},
    with_deadline,
};

/// User units of the slab an append starts from.
#[derive(Debug, Clone)]
struct BaseUnits {
    dir: PathBuf,
    first_unit_file: u64,
    count: u64,
}

impl BaseUnits {
    fn read(&self, ordinal: u64) -> Result<Vec<u8>, IngestError> {
        let path = layout::unit_path(&self.dir, self.first_unit_file + ordinal);
        let unit = match fs::read(&path) {
            Ok(unit) => unit,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SlabError::NotFound(format!("base unit {}", path.display())).into());
            }
            Err(e) => return Err(e.into()),
        };
        if unit.len() != MDU_SIZE {
            return Err(SlabError::InvalidLayout(format!(
                "{} is {} bytes",
                path.display(),
                unit.len()
            ))
            .into());
        }
        Ok(unit)
    }
}

/// Plain-mode encoder.
pub struct PlainIngest {
    engine: Arc<dyn CommitmentEngine>,
    dirs: SlabDirs,
    config: IngestConfig,
    metrics: IngestMetrics,
}

impl std::fmt::Debug for PlainIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainIngest")
            .field("root", &self.dirs.root())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PlainIngest {
    /// Create an encoder publishing under `dirs`.
    pub fn new(engine: Arc<dyn CommitmentEngine>, dirs: SlabDirs, config: IngestConfig) -> Self {
        Self { engine, dirs, config, metrics: IngestMetrics::new("plain") }
    }

    /// Store one file as a new slab.
    pub async fn ingest(
        &self,
        deal: DealId,
        request: IngestRequest,
    ) -> Result<IngestResult, IngestError> {
        with_deadline(self.config.timeout, &self.metrics, self.run(deal, None, request)).await
    }

    /// Add a file to the slab `base`, publishing the result as a new slab.
    ///
    /// `base` is only read. Its user units are carried into the new slab and
    /// the root table and witness units are recomputed.
    pub async fn append(
        &self,
        deal: DealId,
        base: &CommitmentId,
        request: IngestRequest,
    ) -> Result<IngestResult, IngestError> {
        with_deadline(self.config.timeout, &self.metrics, self.run(deal, Some(*base), request))
            .await
    }

    async fn run(
        &self,
        deal: DealId,
        base: Option<CommitmentId>,
        request: IngestRequest,
    ) -> Result<IngestResult, IngestError> {
        check_request(&request)?;

        let (mut builder, base_units) = match base {
            Some(id) => {
                let (builder, units) = self.open_base(deal, &id).await?;
                (builder, Some(units))
            }
            None => (Unit0Builder::new(), None),
        };
        let record = builder.add_file(
            &request.path,
            request.data.len() as u64,
            request.flags,
            request.timestamp,
        )?;
        let user_units = builder.user_unit_count();
        let witness_count = plain_witness_count(user_units);
        debug!(%deal, path = %record.path, start = record.start, user_units, witness_count, "Placed file");

        let staging = StagingDir::create(&self.dirs, deal)?;
        let staged = staging.path().to_path_buf();
        let engine = self.engine.clone();
        let data = request.data.clone();
        let span = FileSpan::new(record.start, record.length);
        let units = run_bounded(self.config.parallelism, user_units, move |u| {
            let mut unit = match &base_units {
                Some(base) if u < base.count => base.read(u)?,
                _ => vec![0u8; MDU_SIZE],
            };
            if span.units().contains(&u) {
                payload::encode_file_into(&mut unit, u, span.start, &data)?;
            }
            let commitment = engine.commit_unit(&unit)?;
            layout::write_atomic(&layout::unit_path(&staged, 1 + witness_count + u), &unit)?;
            Ok(UserUnit { root: commitment.root, witness: commitment.blob_commitments })
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
        let published = staging.publish(&dir)?;
        self.metrics.bytes_ingested.increment(record.length);
        match published {
            Published::Renamed => self.metrics.slabs_published.increment(1),
            Published::AlreadyPresent => self.metrics.slabs_reused.increment(1),
        }
        info!(
            %deal,
            slab = %assembled.commitment,
            path = %record.path,
            bytes = record.length,
            user_units,
            witness_count,
            ?published,
            "Published plain slab"
        );

        Ok(IngestResult {
            commitment: assembled.commitment,
            dir,
            witness_count: assembled.witness_count,
            user_units,
            file: record,
            already_published: published == Published::AlreadyPresent,
        })
    }

    async fn open_base(
        &self,
        deal: DealId,
        id: &CommitmentId,
    ) -> Result<(Unit0Builder, BaseUnits), IngestError> {
        let dir = self.dirs.resolve_existing(id, Some(deal))?;
        tokio::task::spawn_blocking(move || open_base_blocking(&dir)).await?
    }
}

fn open_base_blocking(dir: &Path) -> Result<(Unit0Builder, BaseUnits), IngestError> {
    let unit0 = fs::read(layout::unit_path(dir, 0))?;
    let index = SlabIndex::from_unit0(unit0.clone(), dir)?;
    let builder = Unit0Builder::open(unit0)?;
    let units = BaseUnits {
        dir: dir.to_path_buf(),
        first_unit_file: index.unit_file_index(0),
        count: index.user_unit_count(),
    };
    Ok((builder, units))
}
