//! Interfaces to the collaborators the slab core does not own.
//!
//! - [`LedgerQuery`] - read-only view of deals, providers and on-chain sessions
//! - [`CommitmentEngine`] - unit roots, aggregation, erasure expansion, proofs
//! - [`ProviderClient`] - the provider storage interface (uploads, shard fetch)
//!
//! Implementations live elsewhere: the reference engine in `slabd-commitment`,
//! the HTTP provider client in `slabd-net-http`, in-memory fakes in
//! `slabd-test-utils`.

mod engine;
pub use engine::{
    Aggregate, CommitmentEngine, EngineError, ErasureExpansion, ProofRequest, UnitCommitment,
};

mod ledger;
pub use ledger::{Deal, LedgerError, LedgerQuery, OnChainSession, OnChainSessionStatus};

mod provider;
pub use provider::{ProviderClient, ProviderError, SlabTarget};
