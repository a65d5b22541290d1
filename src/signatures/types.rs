//! Signature record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TrustError;

/// Highest confidence score the judgment scale allows.
pub const MAX_CONFIDENCE_SCORE: u8 = 100;

/// Who put their hand to the consent form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerType {
    #[serde(rename = "SELF")]
    SelfSigned,
    #[serde(rename = "GUARDIAN")]
    Guardian,
}

impl SignerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerType::SelfSigned => "SELF",
            SignerType::Guardian => "GUARDIAN",
        }
    }
}

impl FromStr for SignerType {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SELF" => Ok(SignerType::SelfSigned),
            "GUARDIAN" => Ok(SignerType::Guardian),
            _ => Err(TrustError::Validation(format!("Unknown signer type: {}", s))),
        }
    }
}

impl fmt::Display for SignerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of person the signature belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Donor,
    Patient,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Donor => "DONOR",
            EntityType::Patient => "PATIENT",
        }
    }
}

impl FromStr for EntityType {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DONOR" => Ok(EntityType::Donor),
            "PATIENT" => Ok(EntityType::Patient),
            _ => Err(TrustError::Validation(format!("Unknown entity type: {}", s))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ten caller-supplied fields of a `storeSignature` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSignature {
    pub content_hash: String,
    pub signer_name: String,
    pub signer_type: SignerType,
    pub guardian_name: String,
    pub guardian_relation: String,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub hospital_id: String,
    pub is_verified: bool,
    pub confidence_score: u8,
}

/// Anchored signature record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: u64,
    pub content_hash: String,
    pub signer_name: String,
    pub signer_type: SignerType,
    pub guardian_name: String,
    pub guardian_relation: String,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub hospital_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_verified: bool,
    pub confidence_score: u8,
}

impl SignatureRecord {
    pub(crate) fn from_submission(id: u64, signature: NewSignature, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            content_hash: signature.content_hash,
            signer_name: signature.signer_name,
            signer_type: signature.signer_type,
            guardian_name: signature.guardian_name,
            guardian_relation: signature.guardian_relation,
            entity_type: signature.entity_type,
            entity_id: signature.entity_id,
            hospital_id: signature.hospital_id,
            timestamp,
            is_verified: signature.is_verified,
            confidence_score: signature.confidence_score,
        }
    }
}
