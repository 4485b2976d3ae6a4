//! Ingest configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ingest tuning (TOML-serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Concurrent unit encoders; defaults to the available cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,

    /// Deadline for one ingest, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { parallelism: None, timeout_secs: default_timeout_secs() }
    }
}

impl IngestConfig {
    /// Tuning for the ingest encoders.
    pub fn to_ingest(&self) -> slabd_ingest::IngestConfig {
        let defaults = slabd_ingest::IngestConfig::default();
        slabd_ingest::IngestConfig {
            parallelism: self.parallelism.filter(|n| *n > 0).unwrap_or(defaults.parallelism),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_timeout_secs() -> u64 {
    slabd_ingest::DEFAULT_INGEST_TIMEOUT.as_secs()
}
