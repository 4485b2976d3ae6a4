//! HTTP provider client.
//!
//! Routes, relative to a provider base URL:
//!
//! ```text
//! PUT /slabs/{deal}/{id}/units/{n}
//! PUT /slabs/{deal}/{id}/units/{n}/slots/{s}
//! PUT /slabs/{deal}/{id}/manifest
//! GET /slabs/{deal}/{id}/units/{n}/slots/{s}
//! ```
//!
//! `404` maps to [`ProviderError::NotFound`], `5xx` and transport failures to
//! [`ProviderError::Transient`], any other non-success status to
//! [`ProviderError::Rejected`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use slabd_api::{ProviderClient, ProviderError, SlabTarget};
use tracing::{debug, trace};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// [`ProviderClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: Client,
}

impl Default for HttpProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProviderClient {
    /// Client with the default timeout.
    pub fn new() -> Self {
        Self::with_client(
            Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        )
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = request.send().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
        let status = response.status();
        trace!(url = %response.url(), %status, "Provider response");
        match classify(status) {
            None => Ok(response),
            Some(err) => Err(err),
        }
    }
}

/// Base path of a slab on a provider.
pub fn slab_url(endpoint: &str, target: &SlabTarget) -> String {
    format!(
        "{}/slabs/{}/{}",
        endpoint.trim_end_matches('/'),
        target.deal,
        target.commitment.storage_key()
    )
}

/// URL of a whole unit.
pub fn unit_url(endpoint: &str, target: &SlabTarget, unit_index: u64) -> String {
    format!("{}/units/{unit_index}", slab_url(endpoint, target))
}

/// URL of one shard.
pub fn shard_url(endpoint: &str, target: &SlabTarget, unit_index: u64, slot: usize) -> String {
    format!("{}/slots/{slot}", unit_url(endpoint, target, unit_index))
}

/// URL of the manifest blob.
pub fn manifest_url(endpoint: &str, target: &SlabTarget) -> String {
    format!("{}/manifest", slab_url(endpoint, target))
}

fn classify(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND {
        Some(ProviderError::NotFound)
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderError::Transient(format!("status {status}")))
    } else {
        Some(ProviderError::Rejected(format!("status {status}")))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn upload_unit(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        data: Bytes,
    ) -> Result<(), ProviderError> {
        let url = unit_url(endpoint, target, unit_index);
        debug!(%url, bytes = data.len(), "Uploading unit");
        self.send(self.client.put(url).body(data)).await?;
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
        let url = shard_url(endpoint, target, unit_index, slot);
        debug!(%url, bytes = data.len(), "Uploading shard");
        self.send(self.client.put(url).body(data)).await?;
        Ok(())
    }

    async fn upload_manifest_blob(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        data: Bytes,
    ) -> Result<(), ProviderError> {
        let url = manifest_url(endpoint, target);
        debug!(%url, bytes = data.len(), "Uploading manifest blob");
        self.send(self.client.put(url).body(data)).await?;
        Ok(())
    }

    async fn fetch_shard(
        &self,
        endpoint: &str,
        target: &SlabTarget,
        unit_index: u64,
        slot: usize,
    ) -> Result<Bytes, ProviderError> {
        let url = shard_url(endpoint, target, unit_index, slot);
        let response = self.send(self.client.get(url)).await?;
        response.bytes().await.map_err(|e| ProviderError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slabd_primitives::{CommitmentId, DealId};

    const KEY: &str = "97f1d3a73197d7942695638c4fa9ac0fc3688c4f9774b905a14e3a3f171bac586c55e83ff97a1aeffb3af00adb22c6bb";

    fn target() -> SlabTarget {
        SlabTarget::new(DealId(12), CommitmentId::parse(KEY).unwrap())
    }

    #[test]
    fn test_routes() {
        let base = "http://sp.example:8080/";
        assert_eq!(unit_url(base, &target(), 0), format!("http://sp.example:8080/slabs/12/{KEY}/units/0"));
        assert_eq!(
            shard_url(base, &target(), 3, 11),
            format!("http://sp.example:8080/slabs/12/{KEY}/units/3/slots/11")
        );
        assert_eq!(manifest_url(base, &target()), format!("http://sp.example:8080/slabs/12/{KEY}/manifest"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify(StatusCode::OK), None);
        assert_eq!(classify(StatusCode::NOT_FOUND), Some(ProviderError::NotFound));
        assert!(classify(StatusCode::BAD_GATEWAY).is_some_and(|e| e.is_transient()));
        assert!(classify(StatusCode::FORBIDDEN).is_some_and(|e| !e.is_transient()));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transient() {
        let client = HttpProviderClient::new();
        let err = client
            .fetch_shard("http://127.0.0.1:1", &target(), 1, 0)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
