//! Pinata pinning + IPFS gateway reads

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{validate_cid, ContentStore};
use crate::manifest::Manifest;
use crate::types::{Result, SyncError};

pub const DEFAULT_PINATA_API: &str = "https://api.pinata.cloud";
pub const DEFAULT_GATEWAY: &str = "https://gateway.pinata.cloud/ipfs";

#[derive(Debug, Clone)]
pub struct PinataConfig {
    pub api_url: String,
    pub api_key: String,
    pub secret_api_key: String,
    /// Used when the project does not advertise a gateway
    pub gateway: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PinJsonRequest<'a> {
    pinata_content: &'a Manifest,
    pinata_metadata: PinMetadata<'a>,
}

#[derive(Serialize)]
struct PinMetadata<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct PinJsonResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pinata-backed [`ContentStore`]
pub struct PinataStore {
    config: PinataConfig,
    http: Client,
}

impl PinataStore {
    pub fn new(config: PinataConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        Self { config, http }
    }

    fn manifest_url(&self, cid: &str, gateway_hint: Option<&str>) -> String {
        let gateway = gateway_hint
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(&self.config.gateway);
        format!("{}/{}", gateway.trim_end_matches('/'), cid)
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    async fn fetch_manifest(&self, cid: &str, gateway_hint: Option<&str>) -> Result<Manifest> {
        let url = self.manifest_url(cid, gateway_hint);
        debug!(url = %url, "Fetching manifest");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("manifest fetch {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!("manifest {} not found on gateway", cid)));
        }
        if status.is_server_error() {
            return Err(SyncError::Network(format!("gateway returned HTTP {} for {}", status, cid)));
        }
        if !status.is_success() {
            return Err(SyncError::Protocol(format!("gateway returned HTTP {} for {}", status, cid)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(format!("manifest body for {}: {}", cid, e)))?;
        Manifest::from_json(&body)
    }

    async fn pin_manifest(&self, manifest: &Manifest, name: &str) -> Result<String> {
        let url = format!("{}/pinning/pinJSONToIPFS", self.config.api_url.trim_end_matches('/'));
        let request = PinJsonRequest {
            pinata_content: manifest,
            pinata_metadata: PinMetadata { name },
        };

        let response = self
            .http
            .post(&url)
            .header("pinata_api_key", &self.config.api_key)
            .header("pinata_secret_api_key", &self.config.secret_api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SyncError::Publish(format!("pin request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::Publish(format!("pinning service returned HTTP {}: {}", status, text)));
        }

        let pinned: PinJsonResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Publish(format!("unexpected pin response: {}", e)))?;

        validate_cid(&pinned.ipfs_hash).map_err(SyncError::Publish)?;
        info!(cid = %pinned.ipfs_hash, name = name, entries = manifest.len(), "Pinned manifest");
        Ok(pinned.ipfs_hash)
    }
}
