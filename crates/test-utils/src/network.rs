use std::{
    path::Path,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use alloy_primitives::Address;
use async_trait::async_trait;
use bytes::Bytes;
use slabd_api::{ProviderClient, ProviderError, SlabTarget};
use slabd_slab::{ProviderInbox, SlabError};
use tracing::trace;

use crate::{MemoryLedger, fixtures};

#[derive(Debug)]
struct LocalProvider {
    address: Address,
    multiaddr: String,
    url: String,
    inbox: ProviderInbox,
    offline: AtomicBool,
    uploads: AtomicUsize,
    fetches: AtomicUsize,
}

/// A set of providers living in local directories.
///
/// Provider `i` has address [`fixtures::provider_address`]`(i)`, advertises
/// `/ip4/127.0.0.1/tcp/<9000+i>/http` and stores uploads under `<root>/sp-<i>`.
/// Calls are routed by endpoint URL, nothing touches the network.
#[derive(Debug)]
pub struct LocalProviderNetwork {
    providers: Vec<LocalProvider>,
}

impl LocalProviderNetwork {
    /// Create `count` providers under `root`.
    pub fn new(root: &Path, count: usize) -> Self {
        let providers = (0..count)
            .map(|i| {
                let port = 9000 + i;
                LocalProvider {
                    address: fixtures::provider_address(i),
                    multiaddr: format!("/ip4/127.0.0.1/tcp/{port}/http"),
                    url: format!("http://127.0.0.1:{port}"),
                    inbox: ProviderInbox::new(root.join(format!("sp-{i}"))),
                    offline: AtomicBool::new(false),
                    uploads: AtomicUsize::new(0),
                    fetches: AtomicUsize::new(0),
                }
            })
            .collect();
        Self { providers }
    }

    /// Advertise every provider's endpoint on `ledger`.
    pub fn register(&self, ledger: &MemoryLedger) {
        for provider in &self.providers {
            ledger.set_endpoints(provider.address, vec![provider.multiaddr.clone()]);
        }
    }

    /// Provider addresses in creation order.
    pub fn addresses(&self) -> Vec<Address> {
        self.providers.iter().map(|p| p.address).collect()
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the network has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Storage of provider `i`.
    pub fn inbox(&self, i: usize) -> &ProviderInbox {
        &self.providers[i].inbox
    }

    /// Make provider `i` fail every call with a transient error.
    pub fn set_offline(&self, i: usize, offline: bool) {
        self.providers[i].offline.store(offline, Ordering::SeqCst);
    }

    /// Upload calls provider `i` accepted.
    pub fn upload_count(&self, i: usize) -> usize {
        self.providers[i].uploads.load(Ordering::SeqCst)
    }

    /// Shard fetches provider `i` served.
    pub fn fetch_count(&self, i: usize) -> usize {
        self.providers[i].fetches.load(Ordering::SeqCst)
    }

    fn route(&self, endpoint: &str) -> Result<&LocalProvider, ProviderError> {
        let endpoint = endpoint.trim_end_matches('/');
        let provider = self
            .providers
            .iter()
            .find(|p| p.url == endpoint)
            .ok_or_else(|| ProviderError::Transient(format!("{endpoint} unreachable")))?;
        if provider.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient(format!("{endpoint} offline")));
        }
        Ok(provider)
    }
}

fn provider_error(err: SlabError) -> ProviderError {
    match err {
        SlabError::NotFound(_) => ProviderError::NotFound,
        SlabError::InvalidRequest(msg) => ProviderError::Rejected(msg),
        other => ProviderError::Transient(other.to_string()),
    }
}

#[async_trait]
impl ProviderClient for LocalProviderNetwork {
    async fn upload_unit(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        data: Bytes,
    ) -> Result<(), ProviderError> {
        let provider = self.route(endpoint)?;
        provider.inbox.store_unit(target, unit_index, &data).map_err(provider_error)?;
        provider.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_shard(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
        data: Bytes,
    ) -> Result<(), ProviderError> {
        let provider = self.route(endpoint)?;
        provider.inbox.store_shard(target, unit_index, slot, &data).map_err(provider_error)?;
        provider.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_manifest_blob(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        data: Bytes,
    ) -> Result<(), ProviderError> {
        let provider = self.route(endpoint)?;
        provider.inbox.store_manifest(target, &data).map_err(provider_error)?;
        provider.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_shard(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
    ) -> Result<Bytes, ProviderError> {
        let provider = self.route(endpoint)?;
        let data = provider.inbox.fetch_shard(target, unit_index, slot).map_err(provider_error)?;
        provider.fetches.fetch_add(1, Ordering::SeqCst);
        trace!(%endpoint, unit_index, slot, "Served shard");
        Ok(Bytes::from(data))
    }
}
