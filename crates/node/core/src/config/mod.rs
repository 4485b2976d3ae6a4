//! `slabd.toml` configuration.
//!
//! One section per component:
//! - `storage` - slab root and session database
//! - `ingest` - encoder pool and deadline
//! - `discovery` - ledger caching and retry
//! - `retrieval` - authorization and session lifetimes
//!
//! Sections convert into the tuning structs of their crates. Loading from
//! file and environment happens in `slabd-node-commands`.

mod discovery;
mod ingest;
mod retrieval;
mod storage;

pub use discovery::DiscoveryConfig;
pub use ingest::IngestConfig;
pub use retrieval::RetrievalConfig;
pub use storage::StorageConfig;

use serde::{Deserialize, Serialize};

/// Complete slabd configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlabdConfig {
    /// Slab and session storage.
    pub storage: StorageConfig,
    /// Ingest tuning.
    pub ingest: IngestConfig,
    /// Provider discovery.
    pub discovery: DiscoveryConfig,
    /// Retrieval sessions.
    pub retrieval: RetrievalConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use slabd_discovery::PrimaryPolicy;
    use std::time::Duration;

    #[test]
    fn test_defaults_match_components() {
        let config = SlabdConfig::default();
        assert_eq!(config.discovery.to_discovery(), slabd_discovery::DiscoveryConfig::default());
        assert_eq!(config.retrieval.to_retrieval(), slabd_retrieval::RetrievalConfig::default());
        assert_eq!(config.ingest.to_ingest().timeout, slabd_ingest::DEFAULT_INGEST_TIMEOUT);
        assert!(config.ingest.to_ingest().parallelism >= 1);
    }

    #[test]
    fn test_partial_sections() {
        let config: SlabdConfig = toml::from_str(
            r#"
[storage]
memory_only = true

[discovery]
max_retries = 5
primary = { slot = 2 }

[retrieval]
require_signatures = false
session_ttl_secs = 60
"#,
        )
        .unwrap();

        assert!(config.storage.memory_only);
        assert_eq!(config.storage.root, None);

        let discovery = config.discovery.to_discovery();
        assert_eq!(discovery.max_retries, 5);
        assert_eq!(discovery.primary, PrimaryPolicy::Slot(2));
        assert_eq!(discovery.cache_ttl, slabd_discovery::DEFAULT_CACHE_TTL);

        let retrieval = config.retrieval.to_retrieval();
        assert!(!retrieval.require_signatures);
        assert!(retrieval.fetch_tickets);
        assert_eq!(retrieval.session_ttl, Duration::from_secs(60));
        assert_eq!(retrieval.chain_id, slabd_retrieval::DEFAULT_CHAIN_ID);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut config = SlabdConfig::default();
        config.ingest.parallelism = Some(3);
        config.retrieval.chain_id = 31337;
        let text = toml::to_string(&config).unwrap();
        assert_eq!(toml::from_str::<SlabdConfig>(&text).unwrap(), config);
    }
}
