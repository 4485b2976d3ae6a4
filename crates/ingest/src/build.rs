//! Slab assembly shared by both encoders.
//!
//! Given the root and commitment vector of every user-data unit, assemble the
//! witness units, the root table, unit #0 and the aggregate, and write them
//! into the staging directory.

use std::path::Path;

use slabd_api::{CommitmentEngine, EngineError};
use slabd_primitives::{CommitmentId, Root, constants::MDU_SIZE};
use slabd_slab::{Unit0Builder, layout};

use crate::IngestError;

/// Per-unit output of the encoding workers.
#[derive(Debug, Clone)]
pub(crate) struct UserUnit {
    pub(crate) root: Root,
    /// Commitments this unit contributes to the witness stream.
    pub(crate) witness: Vec<u8>,
}

/// Everything derived from the user units.
#[derive(Debug)]
pub(crate) struct Assembled {
    pub(crate) commitment: CommitmentId,
    pub(crate) witness_count: u64,
}

/// Split the concatenated commitment stream into zero-padded witness units.
pub(crate) fn witness_units(units: &[UserUnit], expected: u64) -> Result<Vec<Vec<u8>>, IngestError> {
    let stream: Vec<u8> = units.iter().flat_map(|u| u.witness.iter().copied()).collect();
    let out: Vec<Vec<u8>> = stream
        .chunks(MDU_SIZE)
        .map(|chunk| {
            let mut unit = vec![0u8; MDU_SIZE];
            unit[..chunk.len()].copy_from_slice(chunk);
            unit
        })
        .collect();

    if out.len() as u64 != expected {
        return Err(EngineError::InvalidInput(format!(
            "witness stream of {} bytes fills {} units, layout expects {expected}",
            stream.len(),
            out.len()
        ))
        .into());
    }
    Ok(out)
}

/// Finish the slab in `staging`: witness units, unit #0 with the root table,
/// and the manifest blob. User units must already be there.
pub(crate) fn assemble(
    engine: &dyn CommitmentEngine,
    staging: &Path,
    mut builder: Unit0Builder,
    units: &[UserUnit],
    witness_count: u64,
) -> Result<Assembled, IngestError> {
    let witness = witness_units(units, witness_count)?;

    let mut roots = Vec::with_capacity(witness.len() + units.len());
    for (i, unit) in witness.iter().enumerate() {
        roots.push(engine.commit_unit(unit)?.root);
        layout::write_atomic(&layout::unit_path(staging, 1 + i as u64), unit)?;
    }
    roots.extend(units.iter().map(|u| u.root));
    builder.set_roots(roots.clone())?;

    let unit0 = builder.finalize();
    let mut manifest = Vec::with_capacity(1 + roots.len());
    manifest.push(engine.commit_unit(&unit0)?.root);
    manifest.extend(roots);
    let aggregate = engine.aggregate(&manifest)?;

    layout::write_atomic(&layout::unit_path(staging, 0), &unit0)?;
    layout::write_atomic(&layout::manifest_path(staging), &aggregate.blob)?;

    Ok(Assembled { commitment: aggregate.commitment, witness_count })
}
