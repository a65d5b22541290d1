//! AI signature judgments
//!
//! The judgment module is an upstream black box: it looks at a signature
//! image and says whether it is genuine and how confident it is.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::TrustError;
use crate::signatures::MAX_CONFIDENCE_SCORE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub is_verified: bool,
    /// 0..=100
    pub confidence_score: u8,
    #[serde(default)]
    pub reason: Option<String>,
    /// Hex compact secp256k1 signature over the judgment, when the module signs
    #[serde(default)]
    pub attestation: Option<String>,
}

impl Judgment {
    pub fn validate(&self) -> Result<(), TrustError> {
        if self.confidence_score > MAX_CONFIDENCE_SCORE {
            return Err(TrustError::Judge(format!(
                "confidence score {} exceeds {}",
                self.confidence_score, MAX_CONFIDENCE_SCORE
            )));
        }
        Ok(())
    }
}

/// What the judge is told about the image under review.
#[derive(Debug, Clone, Serialize)]
pub struct JudgmentRequest<'a> {
    pub content_hash: &'a str,
    pub signer_name: &'a str,
    pub file_name: &'a str,
    pub image_base64: String,
}

#[async_trait]
pub trait SignatureJudge: Send + Sync {
    async fn judge(&self, request: JudgmentRequest<'_>) -> Result<Judgment, TrustError>;
}

/// Judge reached over HTTP: `POST {base_url}/verify` with a JSON body.
#[derive(Debug, Clone)]
pub struct HttpSignatureJudge {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignatureJudge {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TrustError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrustError::Judge(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SignatureJudge for HttpSignatureJudge {
    async fn judge(&self, request: JudgmentRequest<'_>) -> Result<Judgment, TrustError> {
        debug!("Requesting judgment for {}", request.content_hash);
        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TrustError::Judge(format!("Judgment request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TrustError::Judge(format!(
                "Judgment module returned status {}",
                response.status()
            )));
        }

        let judgment: Judgment = response
            .json()
            .await
            .map_err(|e| TrustError::Judge(format!("Malformed judgment: {}", e)))?;
        judgment.validate()?;

        info!(
            "Judgment for {}: verified={} confidence={}",
            request.content_hash, judgment.is_verified, judgment.confidence_score
        );
        Ok(judgment)
    }
}

/// Judge that returns a fixed verdict. Used for dry runs and tests.
#[derive(Debug, Clone)]
pub struct StaticSignatureJudge {
    judgment: Judgment,
}

impl StaticSignatureJudge {
    pub fn new(judgment: Judgment) -> Self {
        Self { judgment }
    }
}

#[async_trait]
impl SignatureJudge for StaticSignatureJudge {
    async fn judge(&self, _request: JudgmentRequest<'_>) -> Result<Judgment, TrustError> {
        Ok(self.judgment.clone())
    }
}

pub fn encode_image(image: &[u8]) -> String {
    STANDARD.encode(image)
}
