//! Two-hop chain proofs: blob -> unit root -> slab commitment.

use serde::{Deserialize, Serialize};
use slabd_api::{EngineError, ProofRequest};
use slabd_primitives::{
    CommitmentId,
    constants::{BLOB_SIZE, BLOBS_PER_MDU, COMMITMENT_SIZE},
};

use crate::ReferenceEngine;

/// Serialized proof produced by the reference engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProof {
    /// Position of the unit root in the manifest.
    pub root_index: u32,
    /// Blob within the unit.
    pub blob_index: u32,
    /// All blob commitments of the unit (first hop).
    pub blob_commitments: Vec<u8>,
    /// Manifest blob (second hop).
    pub manifest: Vec<u8>,
}

impl ChainProof {
    /// Encode with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        postcard::to_allocvec(self).map_err(|e| EngineError::Proof(e.to_string()))
    }

    /// Decode with postcard.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        postcard::from_bytes(bytes).map_err(|e| EngineError::Proof(e.to_string()))
    }
}

pub(crate) fn prove(request: &ProofRequest<'_>) -> Result<Vec<u8>, EngineError> {
    if request.blob_index >= BLOBS_PER_MDU {
        return Err(EngineError::InvalidInput(format!(
            "blob index {} out of range",
            request.blob_index
        )));
    }

    let roots = ReferenceEngine::manifest_roots(request.manifest)?;
    let blob_commitments = ReferenceEngine::blob_commitments(request.unit);
    let root = ReferenceEngine::root_of_commitments(&blob_commitments);

    match roots.get(request.root_index) {
        Some(expected) if *expected == root => {}
        Some(_) => {
            return Err(EngineError::Proof(format!(
                "unit does not match manifest root {}",
                request.root_index
            )));
        }
        None => {
            return Err(EngineError::Proof(format!(
                "root index {} outside manifest of {} roots",
                request.root_index,
                roots.len()
            )));
        }
    }

    ChainProof {
        root_index: request.root_index as u32,
        blob_index: request.blob_index as u32,
        blob_commitments,
        manifest: request.manifest.to_vec(),
    }
    .to_bytes()
}

pub(crate) fn verify(
    commitment: &CommitmentId,
    proof: &[u8],
    blob: &[u8],
) -> Result<bool, EngineError> {
    if blob.len() != BLOB_SIZE {
        return Err(EngineError::InvalidInput(format!(
            "blob must be {BLOB_SIZE} bytes, got {}",
            blob.len()
        )));
    }
    let proof = ChainProof::from_bytes(proof)?;

    let start = proof.blob_index as usize * COMMITMENT_SIZE;
    let Some(claimed) = proof.blob_commitments.get(start..start + COMMITMENT_SIZE) else {
        return Ok(false);
    };
    if claimed != ReferenceEngine::blob_commitment(blob) {
        return Ok(false);
    }

    let roots = ReferenceEngine::manifest_roots(&proof.manifest)?;
    let root = ReferenceEngine::root_of_commitments(&proof.blob_commitments);
    if roots.get(proof.root_index as usize) != Some(&root) {
        return Ok(false);
    }

    Ok(ReferenceEngine::aggregate_point(&roots)? == *commitment)
}
