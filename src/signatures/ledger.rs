//! Signature Ledger
//!
//! Admin-gated, append-only store of anchored signature records. Records live
//! in an arena indexed by `id - 1`; the arena only ever grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{NewSignature, SignatureRecord, MAX_CONFIDENCE_SCORE};
use crate::error::TrustError;
use crate::ledger::events::LedgerEvent;
use crate::ledger::identity::Identity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureLedger {
    admin: Identity,
    records: Vec<SignatureRecord>,
}

impl SignatureLedger {
    pub fn new(admin: Identity) -> Self {
        Self {
            admin,
            records: Vec::new(),
        }
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    fn require_admin(&self, caller: &Identity) -> Result<(), TrustError> {
        if caller != &self.admin {
            warn!("Rejected signature ledger write from non-admin {}", caller);
            return Err(TrustError::not_admin(caller.as_str()));
        }
        Ok(())
    }

    /// Anchor a new signature record and return its id.
    pub fn store_signature(
        &mut self,
        caller: &Identity,
        signature: NewSignature,
        now: DateTime<Utc>,
    ) -> Result<(u64, Vec<LedgerEvent>), TrustError> {
        self.require_admin(caller)?;

        if signature.content_hash.is_empty() {
            return Err(TrustError::Validation("content hash must not be empty".to_string()));
        }
        if signature.confidence_score > MAX_CONFIDENCE_SCORE {
            return Err(TrustError::Validation(format!(
                "confidence score {} exceeds {}",
                signature.confidence_score, MAX_CONFIDENCE_SCORE
            )));
        }

        let id = self.records.len() as u64 + 1;
        let record = SignatureRecord::from_submission(id, signature, now);

        let events = vec![
            LedgerEvent::SignatureStored {
                id,
                content_hash: record.content_hash.clone(),
                signer_name: record.signer_name.clone(),
                entity_type: record.entity_type,
                hospital_id: record.hospital_id.clone(),
            },
            LedgerEvent::SignatureVerified {
                id,
                is_verified: record.is_verified,
                confidence_score: record.confidence_score,
            },
        ];

        info!(
            "Stored signature record {} for {} {} (hospital {})",
            id, record.entity_type, record.entity_id, record.hospital_id
        );
        self.records.push(record);

        Ok((id, events))
    }

    pub fn get_signature(&self, id: u64) -> Result<&SignatureRecord, TrustError> {
        if id == 0 {
            return Err(TrustError::signature_not_found(id));
        }
        self.records
            .get((id - 1) as usize)
            .ok_or_else(|| TrustError::signature_not_found(id))
    }

    pub fn total_signatures(&self) -> u64 {
        self.records.len() as u64
    }

    /// Exact comparison of the anchored content address against a candidate.
    pub fn verify_signature_integrity(&self, id: u64, candidate_hash: &str) -> Result<bool, TrustError> {
        let record = self.get_signature(id)?;
        let matches = record.content_hash == candidate_hash;
        debug!("Integrity check for record {}: {}", id, if matches { "match" } else { "mismatch" });
        Ok(matches)
    }

    /// Hand the single-writer privilege to another identity. Takes effect
    /// immediately; there is no acceptance step on the receiving side.
    pub fn change_admin(
        &mut self,
        caller: &Identity,
        new_admin: Identity,
    ) -> Result<Vec<LedgerEvent>, TrustError> {
        self.require_admin(caller)?;

        let previous = std::mem::replace(&mut self.admin, new_admin.clone());
        warn!("Signature ledger admin changed from {} to {}", previous, new_admin);

        Ok(vec![LedgerEvent::SignatureAdminChanged {
            previous,
            new: new_admin,
        }])
    }
}
