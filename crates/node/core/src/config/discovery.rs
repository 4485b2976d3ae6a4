//! Discovery configuration.

use serde::{Deserialize, Serialize};
use slabd_discovery::{DEFAULT_CACHE_TTL, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_RETRIES, PrimaryPolicy};
use std::time::Duration;

/// Discovery tuning (TOML-serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Lifetime of cached provider lists and endpoints, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Retries after the first ledger attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Primary provider: `"first"` or `{ slot = n }`.
    #[serde(default)]
    pub primary: PrimaryPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            primary: PrimaryPolicy::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Tuning for `ProviderDiscovery`.
    pub fn to_discovery(&self) -> slabd_discovery::DiscoveryConfig {
        slabd_discovery::DiscoveryConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            primary: self.primary,
            ..Default::default()
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF.as_millis() as u64
}
