//! Content-addressed blob stores
//!
//! Encrypted signature images live off-ledger; the ledger only records the
//! content hash the store hands back.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::TrustError;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `data` and return its content hash.
    async fn put(&self, file_name: &str, data: Vec<u8>) -> Result<String, TrustError>;

    async fn get(&self, content_hash: &str) -> Result<Vec<u8>, TrustError>;

    /// Ask the store to retain `content_hash`.
    async fn pin(&self, content_hash: &str) -> Result<(), TrustError>;
}

/// Process-local store addressing content as `sha256:<hex>`.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_hash(data: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(data)))
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// Overwrite a stored blob in place. Only useful to simulate a
    /// misbehaving store in tests.
    pub async fn corrupt(&self, content_hash: &str, data: Vec<u8>) {
        self.blobs.write().await.insert(content_hash.to_string(), data);
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, file_name: &str, data: Vec<u8>) -> Result<String, TrustError> {
        let hash = Self::content_hash(&data);
        debug!("Storing {} ({} bytes) as {}", file_name, data.len(), hash);
        self.blobs.write().await.insert(hash.clone(), data);
        Ok(hash)
    }

    async fn get(&self, content_hash: &str) -> Result<Vec<u8>, TrustError> {
        self.blobs
            .read()
            .await
            .get(content_hash)
            .cloned()
            .ok_or_else(|| TrustError::ContentStore(format!("No content for {}", content_hash)))
    }

    async fn pin(&self, content_hash: &str) -> Result<(), TrustError> {
        if self.blobs.read().await.contains_key(content_hash) {
            Ok(())
        } else {
            Err(TrustError::ContentStore(format!("Cannot pin unknown {}", content_hash)))
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size", default)]
    size: Option<String>,
}

/// Client for an IPFS node's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpContentStore {
    client: reqwest::Client,
    api_url: String,
}

impl HttpContentStore {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, TrustError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrustError::ContentStore(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn put(&self, file_name: &str, data: Vec<u8>) -> Result<String, TrustError> {
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name.to_string()));

        let response = self
            .client
            .post(self.endpoint("add"))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TrustError::ContentStore(format!(
                "Upload of {} failed with status {}",
                file_name,
                response.status()
            )));
        }

        let added: AddResponse = response.json().await?;
        if added.hash.trim().is_empty() {
            return Err(TrustError::ContentStore(format!(
                "Store returned an empty content hash for {}",
                file_name
            )));
        }

        info!(
            "Uploaded {} ({} bytes, store reports {}) as {}",
            file_name,
            size,
            added.size.as_deref().unwrap_or("?"),
            added.hash
        );
        Ok(added.hash)
    }

    async fn get(&self, content_hash: &str) -> Result<Vec<u8>, TrustError> {
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", content_hash)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TrustError::ContentStore(format!(
                "Fetch of {} failed with status {}",
                content_hash,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes for {}", bytes.len(), content_hash);
        Ok(bytes.to_vec())
    }

    async fn pin(&self, content_hash: &str) -> Result<(), TrustError> {
        let response = self
            .client
            .post(self.endpoint("pin/add"))
            .query(&[("arg", content_hash)])
            .send()
            .await?;
        if !response.status().is_success() {
            warn!("Pinning {} failed with status {}", content_hash, response.status());
            return Err(TrustError::ContentStore(format!(
                "Pin of {} failed with status {}",
                content_hash,
                response.status()
            )));
        }
        Ok(())
    }
}
