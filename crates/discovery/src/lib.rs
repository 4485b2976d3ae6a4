//! Provider discovery and failover.
//!
//! Resolves deal -> provider -> endpoint against the ledger. Provider lists and
//! endpoints are cached for a short TTL in per-key concurrent maps; transient
//! ledger failures are retried with exponential backoff, `NotFound` is not.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::{Address, B256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use slabd_api::{Deal, LedgerError, LedgerQuery, OnChainSession};
use slabd_primitives::{DealId, ErrorKind};
use tracing::{debug, warn};

mod endpoint;
pub use endpoint::endpoint_to_url;

/// Default cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Errors from discovery.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// Ledger query failed (after retries, if transient).
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The deal has no assigned providers.
    #[error("deal {0} has no providers")]
    NoProviders(DealId),

    /// The provider advertises no usable endpoint.
    #[error("provider {0} has no usable endpoint")]
    NoEndpoint(Address),
}

impl DiscoveryError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::Ledger(e) => e.kind(),
            DiscoveryError::NoProviders(_) | DiscoveryError::NoEndpoint(_) => ErrorKind::Unavailable,
        }
    }
}

/// Which provider of a deal is "primary" for single-provider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryPolicy {
    /// First assigned provider.
    #[default]
    First,
    /// Provider of the given slot (modulo the provider count).
    Slot(usize),
}

/// How erasure slots map onto a deal's providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// Slot `s` is served by `providers[s % providers.len()]`.
    #[default]
    Modulo,
}

impl SlotPolicy {
    fn pick(&self, providers: &[Address], slot: usize) -> Option<Address> {
        match self {
            SlotPolicy::Modulo if providers.is_empty() => None,
            SlotPolicy::Modulo => Some(providers[slot % providers.len()]),
        }
    }
}

/// Discovery tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Lifetime of cached provider lists and endpoints.
    pub cache_ttl: Duration,
    /// Retries after the first attempt for transient errors.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff: Duration,
    /// Primary provider policy.
    pub primary: PrimaryPolicy,
    /// Slot assignment policy.
    pub slots: SlotPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            primary: PrimaryPolicy::First,
            slots: SlotPolicy::Modulo,
        }
    }
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    at: Instant,
}

/// Deal/provider/endpoint resolver.
pub struct ProviderDiscovery {
    ledger: Arc<dyn LedgerQuery>,
    config: DiscoveryConfig,
    providers: DashMap<DealId, Cached<Vec<Address>>>,
    endpoints: DashMap<Address, Cached<String>>,
}

impl std::fmt::Debug for ProviderDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDiscovery")
            .field("config", &self.config)
            .field("cached_deals", &self.providers.len())
            .field("cached_endpoints", &self.endpoints.len())
            .finish()
    }
}

impl ProviderDiscovery {
    /// Create a resolver.
    pub fn new(ledger: Arc<dyn LedgerQuery>, config: DiscoveryConfig) -> Self {
        Self { ledger, config, providers: DashMap::new(), endpoints: DashMap::new() }
    }

    /// Ledger this resolver queries.
    pub fn ledger(&self) -> &Arc<dyn LedgerQuery> {
        &self.ledger
    }

    /// Active configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Fetch a deal, retrying transient failures. Never cached: callers use
    /// it to re-validate the content root.
    pub async fn deal(&self, deal: DealId) -> Result<Deal, DiscoveryError> {
        Ok(self.with_retry("get_deal", || self.ledger.get_deal(deal)).await?)
    }

    /// Current ledger epoch, retrying transient failures.
    pub async fn current_epoch(&self) -> Result<u64, DiscoveryError> {
        Ok(self.with_retry("current_epoch", || self.ledger.current_epoch()).await?)
    }

    /// Fetch an externally issued retrieval session, retrying transient failures.
    /// Never cached: its status changes under us.
    pub async fn retrieval_session(&self, session: &B256) -> Result<OnChainSession, DiscoveryError> {
        Ok(self
            .with_retry("get_retrieval_session", || self.ledger.get_retrieval_session(session))
            .await?)
    }

    /// Assigned providers of a deal, in slot order.
    pub async fn providers(&self, deal: DealId) -> Result<Vec<Address>, DiscoveryError> {
        if let Some(hit) = self.fresh(&self.providers, &deal) {
            return Ok(hit);
        }

        let providers = self.deal(deal).await?.providers;
        if providers.is_empty() {
            return Err(DiscoveryError::NoProviders(deal));
        }
        debug!(%deal, count = providers.len(), "Resolved deal providers");
        self.providers.insert(deal, Cached { value: providers.clone(), at: Instant::now() });
        Ok(providers)
    }

    /// Primary provider of a deal under the configured policy.
    pub async fn resolve_deal_provider(&self, deal: DealId) -> Result<Address, DiscoveryError> {
        let providers = self.providers(deal).await?;
        let slot = match self.config.primary {
            PrimaryPolicy::First => 0,
            PrimaryPolicy::Slot(slot) => slot,
        };
        self.config.slots.pick(&providers, slot).ok_or(DiscoveryError::NoProviders(deal))
    }

    /// Provider responsible for an erasure slot.
    pub async fn slot_provider(&self, deal: DealId, slot: usize) -> Result<Address, DiscoveryError> {
        let providers = self.providers(deal).await?;
        self.config.slots.pick(&providers, slot).ok_or(DiscoveryError::NoProviders(deal))
    }

    /// Base URL of a provider.
    pub async fn resolve_endpoint(&self, provider: &Address) -> Result<String, DiscoveryError> {
        if let Some(hit) = self.fresh(&self.endpoints, provider) {
            return Ok(hit);
        }

        let advertised = self
            .with_retry("get_provider_endpoints", || self.ledger.get_provider_endpoints(provider))
            .await?;
        let url = advertised
            .iter()
            .find_map(|raw| endpoint_to_url(raw))
            .ok_or(DiscoveryError::NoEndpoint(*provider))?;

        debug!(%provider, %url, "Resolved provider endpoint");
        self.endpoints.insert(*provider, Cached { value: url.clone(), at: Instant::now() });
        Ok(url)
    }

    /// Endpoint of the provider responsible for `slot`.
    pub async fn slot_endpoint(&self, deal: DealId, slot: usize) -> Result<String, DiscoveryError> {
        let provider = self.slot_provider(deal, slot).await?;
        self.resolve_endpoint(&provider).await
    }

    /// Forget a provider's endpoint, e.g. after a failed call.
    pub fn invalidate_endpoint(&self, provider: &Address) {
        self.endpoints.remove(provider);
    }

    /// Forget a deal's provider list.
    pub fn invalidate_deal(&self, deal: DealId) {
        self.providers.remove(&deal);
    }

    fn fresh<K, V>(&self, cache: &DashMap<K, Cached<V>>, key: &K) -> Option<V>
    where
        K: std::hash::Hash + Eq,
        V: Clone,
    {
        let entry = cache.get(key)?;
        (entry.at.elapsed() < self.config.cache_ttl).then(|| entry.value.clone())
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, ?backoff, "Transient ledger error, retrying");
                    metrics::counter!("slabd.discovery.retries", "op" => op).increment(1);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
