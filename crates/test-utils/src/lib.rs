//! Test utilities for slabd crates.
//!
//! - [`MemoryLedger`] - in-memory [`LedgerQuery`](slabd_api::LedgerQuery)
//! - [`LocalProviderNetwork`] - providers backed by local
//!   [`ProviderInbox`](slabd_slab::ProviderInbox) trees, reachable through
//!   [`ProviderClient`](slabd_api::ProviderClient)
//! - [`fixtures`] - deterministic keys, addresses and sample payloads

pub mod fixtures;

mod ledger;
pub use ledger::MemoryLedger;

mod network;
pub use network::LocalProviderNetwork;
