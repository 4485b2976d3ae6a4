//! Core primitive types for slab storage.
//!
//! This crate provides the fundamental types shared across the slabd stack,
//! kept separate to avoid circular dependencies:
//!
//! - [`constants`] - unit (MDU) geometry: blob, scalar and table sizes
//! - [`CommitmentId`] - canonical 48-byte slab commitment identifier
//! - [`DealId`] - ledger deal identifier
//! - [`StripeParams`] - plain vs erasure-coded layout selected from deal parameters
//! - [`ErrorKind`] - machine-readable error taxonomy shared by every crate

pub mod constants;

mod commitment;
pub use commitment::{CommitmentId, IdentifierError};

mod deal;
pub use deal::DealId;

mod error;
pub use error::ErrorKind;

mod stripe;
pub use stripe::{StripeError, StripeMode, StripeParams};

/// 32-byte Merkle/unit root.
pub type Root = alloy_primitives::B256;
