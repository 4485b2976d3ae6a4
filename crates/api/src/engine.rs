//! Commitment engine interface.
//!
//! The engine is a black box to the core: it turns unit bytes into roots, roots
//! into a slab commitment, units into erasure shards and back, and produces the
//! two-hop proof attached to every served blob.

use slabd_primitives::{CommitmentId, ErrorKind, Root};

/// Errors from the commitment engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Input had the wrong size or shape.
    #[error("invalid engine input: {0}")]
    InvalidInput(String),

    /// Too few shards to rebuild the unit.
    #[error("not enough shards: have {have}, need {need}")]
    NotEnoughShards {
        /// Shards supplied.
        have: usize,
        /// Shards required.
        need: usize,
    },

    /// Proof could not be produced or decoded.
    #[error("proof error: {0}")]
    Proof(String),
}

impl EngineError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotEnoughShards { .. } => ErrorKind::InsufficientShards,
            EngineError::InvalidInput(_) | EngineError::Proof(_) => ErrorKind::Internal,
        }
    }
}

/// Root and raw blob commitments of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCommitment {
    /// Unit root.
    pub root: Root,
    /// Concatenated 48-byte blob commitments, one per blob.
    pub blob_commitments: Vec<u8>,
}

/// Result of aggregating the root list of a slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// Slab commitment identifier.
    pub commitment: CommitmentId,
    /// Manifest blob (opening material for the second proof hop).
    pub blob: Vec<u8>,
}

/// Erasure expansion of one user-data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasureExpansion {
    /// Flattened shard-blob commitments, `leaf_count * 48` bytes.
    pub witness: Vec<u8>,
    /// `k` data shards followed by `m` parity shards.
    pub shards: Vec<Vec<u8>>,
}

/// Input for a chained proof over one blob.
#[derive(Debug, Clone, Copy)]
pub struct ProofRequest<'a> {
    /// Manifest blob of the slab.
    pub manifest: &'a [u8],
    /// Position of the unit in `[unit0, witness.., user..]`.
    pub root_index: usize,
    /// Full unit bytes.
    pub unit: &'a [u8],
    /// Blob within the unit.
    pub blob_index: usize,
}

/// Commitment engine.
///
/// All methods are CPU bound and synchronous; async callers run them on the
/// blocking pool.
pub trait CommitmentEngine: Send + Sync + 'static {
    /// Commit to a full unit.
    fn commit_unit(&self, unit: &[u8]) -> Result<UnitCommitment, EngineError>;

    /// Aggregate `[unit0_root, witness_roots.., user_roots..]`.
    fn aggregate(&self, roots: &[Root]) -> Result<Aggregate, EngineError>;

    /// Expand a unit into `k` data and `m` parity shards plus its witness vector.
    fn expand_erasure(&self, unit: &[u8], k: usize, m: usize)
    -> Result<ErasureExpansion, EngineError>;

    /// Rebuild a unit from at least `k` present shards.
    fn reconstruct(
        &self,
        shards: Vec<Option<Vec<u8>>>,
        k: usize,
        m: usize,
    ) -> Result<Vec<u8>, EngineError>;

    /// Produce the proof chaining a blob to the slab commitment.
    fn prove_chain(&self, request: &ProofRequest<'_>) -> Result<Vec<u8>, EngineError>;

    /// Verify a proof produced by [`CommitmentEngine::prove_chain`] against a blob.
    fn verify_chain(
        &self,
        commitment: &CommitmentId,
        proof: &[u8],
        blob: &[u8],
    ) -> Result<bool, EngineError>;
}
