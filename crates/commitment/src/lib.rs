//! Reference commitment engine.
//!
//! [`ReferenceEngine`] implements [`CommitmentEngine`] with cheap, deterministic
//! primitives so the slab core can be exercised end to end without a KZG setup:
//!
//! - blob commitment: `keccak256("blob" || blob) || keccak256(that)[..16]` (48 bytes)
//! - unit root: `keccak256(blob_commitments)`
//! - slab identifier: `G1 * Fr(keccak256(lo || roots) || keccak256(hi || roots))`, a compressed BLS12-381 point
//! - erasure: Reed-Solomon over GF(2^8)
//!
//! It offers no cryptographic binding beyond collision resistance of keccak and
//! must not be used where proofs are checked by third parties.

mod erasure;
mod proof;

pub use proof::ChainProof;

use alloy_primitives::keccak256;
use bls12_381::{G1Affine, G1Projective, Scalar};
use slabd_api::{
    Aggregate, CommitmentEngine, EngineError, ErasureExpansion, ProofRequest, UnitCommitment,
};
use slabd_primitives::{
    CommitmentId, Root,
    constants::{BLOB_SIZE, COMMITMENT_SIZE, MDU_SIZE, ROOT_SIZE},
};

const BLOB_DOMAIN: &[u8] = b"slabd/blob";
const AGGREGATE_DOMAIN_LO: &[u8] = b"slabd/aggregate/0";
const AGGREGATE_DOMAIN_HI: &[u8] = b"slabd/aggregate/1";

/// Reference [`CommitmentEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEngine;

impl ReferenceEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }

    /// 48-byte commitment to a single blob.
    pub fn blob_commitment(blob: &[u8]) -> [u8; COMMITMENT_SIZE] {
        let mut input = Vec::with_capacity(BLOB_DOMAIN.len() + blob.len());
        input.extend_from_slice(BLOB_DOMAIN);
        input.extend_from_slice(blob);
        let head = keccak256(&input);
        let tail = keccak256(head);

        let mut out = [0u8; COMMITMENT_SIZE];
        out[..32].copy_from_slice(head.as_slice());
        out[32..].copy_from_slice(&tail[..16]);
        out
    }

    /// Concatenated commitments of every blob-sized piece of `data`.
    pub fn blob_commitments(data: &[u8]) -> Vec<u8> {
        data.chunks(BLOB_SIZE)
            .flat_map(Self::blob_commitment)
            .collect()
    }

    /// Unit root over flattened blob commitments.
    pub fn root_of_commitments(commitments: &[u8]) -> Root {
        keccak256(commitments)
    }

    /// Decode the root list carried by a manifest blob.
    pub fn manifest_roots(blob: &[u8]) -> Result<Vec<Root>, EngineError> {
        if blob.len() % ROOT_SIZE != 0 {
            return Err(EngineError::InvalidInput(format!(
                "manifest length {} is not a multiple of {ROOT_SIZE}",
                blob.len()
            )));
        }
        Ok(blob.chunks_exact(ROOT_SIZE).map(Root::from_slice).collect())
    }

    fn aggregate_point(roots: &[Root]) -> Result<CommitmentId, EngineError> {
        let mut lo = Vec::with_capacity(AGGREGATE_DOMAIN_LO.len() + roots.len() * ROOT_SIZE);
        lo.extend_from_slice(AGGREGATE_DOMAIN_LO);
        let mut hi = Vec::with_capacity(lo.capacity());
        hi.extend_from_slice(AGGREGATE_DOMAIN_HI);
        for root in roots {
            lo.extend_from_slice(root.as_slice());
            hi.extend_from_slice(root.as_slice());
        }

        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(keccak256(&lo).as_slice());
        wide[32..].copy_from_slice(keccak256(&hi).as_slice());

        let scalar = Scalar::from_bytes_wide(&wide);
        let point = G1Affine::from(G1Projective::generator() * scalar);

        CommitmentId::from_bytes(&point.to_compressed())
            .map_err(|e| EngineError::InvalidInput(format!("aggregate point: {e}")))
    }
}

impl CommitmentEngine for ReferenceEngine {
    fn commit_unit(&self, unit: &[u8]) -> Result<UnitCommitment, EngineError> {
        if unit.len() != MDU_SIZE {
            return Err(EngineError::InvalidInput(format!(
                "unit must be {MDU_SIZE} bytes, got {}",
                unit.len()
            )));
        }
        let blob_commitments = Self::blob_commitments(unit);
        Ok(UnitCommitment {
            root: Self::root_of_commitments(&blob_commitments),
            blob_commitments,
        })
    }

    fn aggregate(&self, roots: &[Root]) -> Result<Aggregate, EngineError> {
        if roots.is_empty() {
            return Err(EngineError::InvalidInput("no roots to aggregate".into()));
        }
        let blob = roots.iter().flat_map(|r| r.0).collect();
        Ok(Aggregate {
            commitment: Self::aggregate_point(roots)?,
            blob,
        })
    }

    fn expand_erasure(
        &self,
        unit: &[u8],
        k: usize,
        m: usize,
    ) -> Result<ErasureExpansion, EngineError> {
        let shards = erasure::encode(unit, k, m)?;
        let witness = shards
            .iter()
            .flat_map(|shard| Self::blob_commitments(shard))
            .collect();
        Ok(ErasureExpansion { witness, shards })
    }

    fn reconstruct(
        &self,
        shards: Vec<Option<Vec<u8>>>,
        k: usize,
        m: usize,
    ) -> Result<Vec<u8>, EngineError> {
        erasure::reconstruct(shards, k, m)
    }

    fn prove_chain(&self, request: &ProofRequest<'_>) -> Result<Vec<u8>, EngineError> {
        proof::prove(request)
    }

    fn verify_chain(
        &self,
        commitment: &CommitmentId,
        proof: &[u8],
        blob: &[u8],
    ) -> Result<bool, EngineError> {
        proof::verify(commitment, proof, blob)
    }
}
