//! Retrieval configuration.

use serde::{Deserialize, Serialize};
use slabd_retrieval::{DEFAULT_CHAIN_ID, DEFAULT_MAX_EXPIRY_WINDOW, DEFAULT_SESSION_TTL};
use std::time::Duration;

/// Retrieval tuning (TOML-serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Reject fetches without an owner signature.
    #[serde(default = "default_true")]
    pub require_signatures: bool,

    /// Issue a fetch ticket for fetches outside any session.
    #[serde(default = "default_true")]
    pub unsigned_fetch_tickets: bool,

    /// Chain id in the signing domain.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Furthest a signed request may expire in the future, in seconds.
    #[serde(default = "default_max_expiry_window_secs")]
    pub max_expiry_window_secs: u64,

    /// Lifetime of fetch tickets and download sessions, in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            require_signatures: true,
            unsigned_fetch_tickets: true,
            chain_id: default_chain_id(),
            max_expiry_window_secs: default_max_expiry_window_secs(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl RetrievalConfig {
    /// Tuning for `RetrievalService`.
    pub fn to_retrieval(&self) -> slabd_retrieval::RetrievalConfig {
        slabd_retrieval::RetrievalConfig {
            require_signatures: self.require_signatures,
            fetch_tickets: self.unsigned_fetch_tickets,
            chain_id: self.chain_id,
            max_expiry_window: Duration::from_secs(self.max_expiry_window_secs),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_max_expiry_window_secs() -> u64 {
    DEFAULT_MAX_EXPIRY_WINDOW.as_secs()
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}
