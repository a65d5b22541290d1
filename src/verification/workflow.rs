//! Anchoring and verification workflows
//!
//! Write side: encrypt the signature image, upload the ciphertext, obtain a
//! judgment and anchor the record on the ledger. Read side: check the
//! caller's content hash against the ledger, fetch and decrypt the image and
//! apply the trust policy to the recorded judgment.

use secp256k1::PublicKey;
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto::attestation::verify_judgment_attestation;
use crate::crypto::{EncryptionMetadata, FileEncryptor};
use crate::error::TrustError;
use crate::ledger::{LedgerClient, Receipt};
use crate::signatures::{EntityType, NewSignature, SignatureRecord, SignerType};
use crate::verification::judgment::{encode_image, Judgment, JudgmentRequest, SignatureJudge};
use crate::verification::store::ContentStore;

/// Largest signature image accepted for anchoring.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Default minimum confidence for a judgment to be trusted.
pub const MIN_TRUSTED_CONFIDENCE: u8 = 75;

#[derive(Debug, Clone)]
pub struct TrustPolicy {
    pub min_confidence: u8,
    /// Refuse to anchor judgments without a valid attestation.
    pub require_attestation: bool,
    pub attestor: Option<PublicKey>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            min_confidence: MIN_TRUSTED_CONFIDENCE,
            require_attestation: false,
            attestor: None,
        }
    }
}

impl TrustPolicy {
    pub fn is_trusted(&self, is_verified: bool, confidence_score: u8) -> bool {
        is_verified && confidence_score >= self.min_confidence
    }

    fn check_attestation(&self, content_hash: &str, judgment: &Judgment) -> Result<(), TrustError> {
        let Some(attestor) = &self.attestor else {
            if self.require_attestation {
                return Err(TrustError::Config(
                    "attestation required but no attestor key configured".to_string(),
                ));
            }
            return Ok(());
        };

        match &judgment.attestation {
            Some(attestation) => {
                let valid = verify_judgment_attestation(
                    attestor,
                    attestation,
                    content_hash,
                    judgment.is_verified,
                    judgment.confidence_score,
                )?;
                if !valid {
                    warn!("Judgment attestation for {} does not verify", content_hash);
                    return Err(TrustError::Judge(format!(
                        "attestation for {} does not match the judgment",
                        content_hash
                    )));
                }
                Ok(())
            }
            None if self.require_attestation => Err(TrustError::Judge(format!(
                "judgment for {} is not attested",
                content_hash
            ))),
            None => Ok(()),
        }
    }
}

/// A signature image plus the signer details to anchor with it.
#[derive(Debug, Clone)]
pub struct SignatureSubmission {
    pub image: Vec<u8>,
    pub file_name: String,
    pub signer_name: String,
    pub signer_type: SignerType,
    pub guardian_name: String,
    pub guardian_relation: String,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub hospital_id: String,
}

#[derive(Debug, Clone)]
pub struct AnchoredSignature {
    pub record_id: u64,
    pub content_hash: String,
    pub encrypted_file_name: String,
    pub metadata: EncryptionMetadata,
    pub judgment: Judgment,
    pub receipt: Receipt,
}

#[derive(Debug, Clone)]
pub struct TrustDecision {
    pub record: SignatureRecord,
    pub integrity_ok: bool,
    pub trusted: bool,
    pub reasons: Vec<String>,
    /// Decrypted image; only present when the integrity check passed.
    pub image: Option<Vec<u8>>,
}

pub struct VerificationWorkflow {
    ledger: LedgerClient,
    encryptor: FileEncryptor,
    store: Arc<dyn ContentStore>,
    judge: Arc<dyn SignatureJudge>,
    policy: TrustPolicy,
}

impl VerificationWorkflow {
    pub fn new(
        ledger: LedgerClient,
        encryptor: FileEncryptor,
        store: Arc<dyn ContentStore>,
        judge: Arc<dyn SignatureJudge>,
        policy: TrustPolicy,
    ) -> Self {
        Self {
            ledger,
            encryptor,
            store,
            judge,
            policy,
        }
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Encrypt, upload, judge and anchor. Returns once the ledger has
    /// confirmed the record.
    pub async fn anchor(&self, submission: SignatureSubmission) -> Result<AnchoredSignature, TrustError> {
        if submission.image.is_empty() {
            return Err(TrustError::Validation("signature image is empty".to_string()));
        }
        if submission.image.len() > MAX_IMAGE_BYTES {
            return Err(TrustError::Validation(format!(
                "signature image is {} bytes, limit is {}",
                submission.image.len(),
                MAX_IMAGE_BYTES
            )));
        }

        let encrypted = self.encryptor.encrypt(
            &submission.image,
            &submission.file_name,
            submission.entity_type,
            submission.entity_id,
        )?;

        let content_hash = self
            .store
            .put(&encrypted.encrypted_file_name, encrypted.encrypted_data)
            .await?;
        if content_hash.trim().is_empty() {
            return Err(TrustError::ContentStore(
                "store returned an empty content hash".to_string(),
            ));
        }
        if let Err(e) = self.store.pin(&content_hash).await {
            warn!("Failed to pin {}: {}", content_hash, e);
        }

        let judgment = self
            .judge
            .judge(JudgmentRequest {
                content_hash: &content_hash,
                signer_name: &submission.signer_name,
                file_name: &submission.file_name,
                image_base64: encode_image(&submission.image),
            })
            .await?;
        judgment.validate()?;
        self.policy.check_attestation(&content_hash, &judgment)?;

        let receipt = self
            .ledger
            .store_signature(NewSignature {
                content_hash: content_hash.clone(),
                signer_name: submission.signer_name,
                signer_type: submission.signer_type,
                guardian_name: submission.guardian_name,
                guardian_relation: submission.guardian_relation,
                entity_type: submission.entity_type,
                entity_id: submission.entity_id,
                hospital_id: submission.hospital_id,
                is_verified: judgment.is_verified,
                confidence_score: judgment.confidence_score,
            })
            .await?
            .confirmed()
            .await?;

        let record_id = receipt.signature_id().ok_or_else(|| {
            TrustError::Storage("store_signature committed without a record id".to_string())
        })?;
        info!(
            "Anchored signature record {} for {} {} ({})",
            record_id, encrypted.metadata.entity_type, encrypted.metadata.entity_id, content_hash
        );

        Ok(AnchoredSignature {
            record_id,
            content_hash,
            encrypted_file_name: encrypted.encrypted_file_name,
            metadata: encrypted.metadata,
            judgment,
            receipt,
        })
    }

    /// Check `expected_hash` against record `record_id`, then fetch and
    /// decrypt the image and apply the trust policy.
    pub async fn verify_and_open(
        &self,
        record_id: u64,
        expected_hash: &str,
        metadata: &EncryptionMetadata,
    ) -> Result<TrustDecision, TrustError> {
        let record = self.ledger.get_signature(record_id).await?;
        let mut reasons = Vec::new();

        let integrity_ok = self
            .ledger
            .verify_signature_integrity(record_id, expected_hash)
            .await?;
        if !integrity_ok {
            warn!("Content hash mismatch for signature record {}", record_id);
            reasons.push(format!(
                "content hash {} does not match the anchored hash",
                expected_hash
            ));
            return Ok(TrustDecision {
                record,
                integrity_ok,
                trusted: false,
                reasons,
                image: None,
            });
        }

        if metadata.entity_type != record.entity_type || metadata.entity_id != record.entity_id {
            return Err(TrustError::Validation(format!(
                "encryption metadata is for {} {}, record {} is for {} {}",
                metadata.entity_type, metadata.entity_id, record_id, record.entity_type, record.entity_id
            )));
        }

        let ciphertext = self.store.get(expected_hash).await?;
        let image = self.encryptor.decrypt(&ciphertext, metadata)?;

        if !record.is_verified {
            reasons.push("judgment did not verify the signature".to_string());
        }
        if record.confidence_score < self.policy.min_confidence {
            reasons.push(format!(
                "confidence {} is below {}",
                record.confidence_score, self.policy.min_confidence
            ));
        }
        let trusted = self
            .policy
            .is_trusted(record.is_verified, record.confidence_score);

        info!(
            "Signature record {}: integrity ok, trusted={}",
            record_id, trusted
        );
        Ok(TrustDecision {
            record,
            integrity_ok,
            trusted,
            reasons,
            image: Some(image),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_threshold() {
        let policy = TrustPolicy::default();
        assert!(policy.is_trusted(true, 75));
        assert!(policy.is_trusted(true, 100));
        assert!(!policy.is_trusted(true, 74));
        assert!(!policy.is_trusted(false, 99));
    }
}
