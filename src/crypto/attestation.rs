//! Judgment attestation
//!
//! A judgment module may sign `(content_hash, is_verified, confidence_score)`
//! so the anchoring writer can check that a judgment was not altered or
//! invented on the way to the ledger.

use secp256k1::PublicKey;

use crate::crypto::signing::{verify_message, SigningKey};
use crate::error::TrustError;

const DOMAIN: &str = "consent-ledger/judgment/v1";

pub fn judgment_message(content_hash: &str, is_verified: bool, confidence_score: u8) -> String {
    format!("{}|{}|{}|{}", DOMAIN, content_hash, is_verified, confidence_score)
}

pub fn attest_judgment(
    key: &SigningKey,
    content_hash: &str,
    is_verified: bool,
    confidence_score: u8,
) -> Result<String, TrustError> {
    key.sign(&judgment_message(content_hash, is_verified, confidence_score))
}

pub fn verify_judgment_attestation(
    attestor: &PublicKey,
    attestation: &str,
    content_hash: &str,
    is_verified: bool,
    confidence_score: u8,
) -> Result<bool, TrustError> {
    verify_message(
        &judgment_message(content_hash, is_verified, confidence_score),
        attestation,
        attestor,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_binds_every_field() {
        let judge = SigningKey::generate();
        let attestation = attest_judgment(&judge, "sha256:abc", true, 90).unwrap();

        assert!(verify_judgment_attestation(judge.public_key(), &attestation, "sha256:abc", true, 90).unwrap());
        assert!(!verify_judgment_attestation(judge.public_key(), &attestation, "sha256:abd", true, 90).unwrap());
        assert!(!verify_judgment_attestation(judge.public_key(), &attestation, "sha256:abc", false, 90).unwrap());
        assert!(!verify_judgment_attestation(judge.public_key(), &attestation, "sha256:abc", true, 91).unwrap());
    }
}
