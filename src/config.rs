//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `CONSENT_LEDGER__*` environment variables (for example
//! `CONSENT_LEDGER__VOTING__APPROVAL_THRESHOLD=60`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::crypto::signing::parse_public_key;
use crate::crypto::MasterKey;
use crate::error::TrustError;
use crate::ledger::Identity;
use crate::policy::VotingParams;
use crate::signatures::MAX_CONFIDENCE_SCORE;
use crate::verification::TrustPolicy;

pub const ENV_PREFIX: &str = "CONSENT_LEDGER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub voting: VotingConfig,
    pub encryption: EncryptionConfig,
    pub trust: TrustConfig,
    pub content_store: ContentStoreConfig,
    pub judge: JudgeConfig,
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub path: PathBuf,
    /// fsync every committed entry before confirming it
    pub sync_writes: bool,
    /// Admin recorded at genesis when a new ledger is created
    pub admin: Option<String>,
    /// secp256k1 key file the CLI acts as
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingConfig {
    pub approval_threshold: u64,
    pub voting_period_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// base64 of exactly 32 bytes
    pub master_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    pub min_confidence: u8,
    pub require_attestation: bool,
    pub attestor_public_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStoreKind {
    Memory,
    Ipfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentStoreConfig {
    pub kind: ContentStoreKind,
    pub api_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl ContentStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl JudgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load defaults, then `path` if given and present, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, TrustError> {
        let defaults = VotingParams::default();
        let mut builder = Config::builder()
            .set_default("ledger.path", "data/ledger.jsonl")?
            .set_default("ledger.sync_writes", true)?
            .set_default("ledger.key_path", "data/operator.key")?
            .set_default("voting.approval_threshold", defaults.approval_threshold)?
            .set_default("voting.voting_period_secs", defaults.voting_period_secs)?
            .set_default("trust.min_confidence", 75)?
            .set_default("trust.require_attestation", false)?
            .set_default("content_store.kind", "memory")?
            .set_default("content_store.api_url", "http://127.0.0.1:5001")?
            .set_default("content_store.timeout_secs", 30)?
            .set_default("judge.timeout_secs", 30)?
            .set_default("database_url", "sqlite://data/consent-ledger.db")?;

        if let Some(path) = path {
            info!("Loading configuration from {:?}", path);
            builder = builder.add_source(File::from(path).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), TrustError> {
        self.voting_params()
            .validate()
            .map_err(|e| TrustError::Config(e.to_string()))?;

        if self.trust.min_confidence > MAX_CONFIDENCE_SCORE {
            return Err(TrustError::Config(format!(
                "trust.min_confidence {} exceeds {}",
                self.trust.min_confidence, MAX_CONFIDENCE_SCORE
            )));
        }
        if self.trust.require_attestation && self.trust.attestor_public_key.is_none() {
            return Err(TrustError::Config(
                "trust.require_attestation needs trust.attestor_public_key".to_string(),
            ));
        }
        if let Some(key) = &self.trust.attestor_public_key {
            parse_public_key(key).map_err(|e| TrustError::Config(e.to_string()))?;
        }
        if self.encryption.master_key.is_some() {
            self.master_key()?;
        }
        self.admin_identity()?;
        Ok(())
    }

    pub fn voting_params(&self) -> VotingParams {
        VotingParams {
            approval_threshold: self.voting.approval_threshold,
            voting_period_secs: self.voting.voting_period_secs,
        }
    }

    pub fn master_key(&self) -> Result<MasterKey, TrustError> {
        let encoded = self.encryption.master_key.as_deref().ok_or_else(|| {
            TrustError::Config("encryption.master_key is not set".to_string())
        })?;
        MasterKey::from_base64(encoded)
    }

    pub fn admin_identity(&self) -> Result<Option<Identity>, TrustError> {
        self.ledger
            .admin
            .as_deref()
            .map(|admin| {
                admin
                    .parse()
                    .map_err(|e| TrustError::Config(format!("ledger.admin: {}", e)))
            })
            .transpose()
    }

    pub fn trust_policy(&self) -> Result<TrustPolicy, TrustError> {
        let attestor = self
            .trust
            .attestor_public_key
            .as_deref()
            .map(parse_public_key)
            .transpose()?;
        Ok(TrustPolicy {
            min_confidence: self.trust.min_confidence,
            require_attestation: self.trust.require_attestation,
            attestor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.voting_params(), VotingParams::default());
        assert_eq!(config.trust.min_confidence, 75);
        assert_eq!(config.content_store.kind, ContentStoreKind::Memory);
        assert!(config.ledger.sync_writes);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let key = MasterKey::generate().to_base64();
        let file = write_config(&format!(
            r#"
            database_url = "sqlite::memory:"

            [voting]
            approval_threshold = 66
            voting_period_secs = 3600

            [encryption]
            master_key = "{}"

            [ledger]
            admin = "0x00000000000000000000000000000000000000AA"
            "#,
            key
        ));

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.voting.approval_threshold, 66);
        assert_eq!(config.voting.voting_period_secs, 3600);
        assert!(config.master_key().is_ok());
        assert_eq!(
            config.admin_identity().unwrap().unwrap().as_str(),
            "0x00000000000000000000000000000000000000aa"
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let file = write_config("[voting]\napproval_threshold = 101\n");
        assert!(matches!(AppConfig::load(Some(file.path())), Err(TrustError::Config(_))));

        let file = write_config("[voting]\nvoting_period_secs = 0\n");
        assert!(AppConfig::load(Some(file.path())).is_err());

        let file = write_config("[encryption]\nmaster_key = \"c2hvcnQ=\"\n");
        assert!(AppConfig::load(Some(file.path())).is_err());

        let file = write_config("[ledger]\nadmin = \"hospital-admin\"\n");
        assert!(AppConfig::load(Some(file.path())).is_err());

        let file = write_config("[trust]\nrequire_attestation = true\n");
        assert!(AppConfig::load(Some(file.path())).is_err());
    }
}
