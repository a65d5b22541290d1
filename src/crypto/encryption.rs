//! Symmetric File Encryption
//!
//! AES-256-GCM with a fresh random 96-bit nonce per file. Output layout is
//! `nonce || ciphertext || tag`. The file name, entity type and entity id are
//! bound in as associated data, so ciphertext cannot be re-labelled for a
//! different entity without failing authentication.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::crypto::keys::MasterKey;
use crate::error::TrustError;
use crate::signatures::EntityType;

pub const ALGORITHM: &str = "AES-256-GCM";
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

/// Recorded next to the ciphertext; required to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub file_name: String,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub algorithm: String,
    /// Base64 of the nonce that prefixes the ciphertext
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

impl EncryptionMetadata {
    fn associated_data(&self) -> Vec<u8> {
        associated_data(&self.file_name, self.entity_type, self.entity_id)
    }
}

#[derive(Debug, Clone)]
pub struct EncryptedFileData {
    /// `nonce || ciphertext || tag`
    pub encrypted_data: Vec<u8>,
    pub nonce_base64: String,
    pub metadata: EncryptionMetadata,
    pub encrypted_file_name: String,
}

fn associated_data(file_name: &str, entity_type: EntityType, entity_id: u64) -> Vec<u8> {
    // JSON keeps field boundaries unambiguous whatever the file name contains.
    serde_json::to_vec(&(file_name, entity_type.as_str(), entity_id)).unwrap_or_default()
}

/// Stateless apart from the key; share freely between tasks.
#[derive(Clone)]
pub struct FileEncryptor {
    cipher: Aes256Gcm,
    key_fingerprint: String,
}

impl FileEncryptor {
    pub fn new(key: &MasterKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
            key_fingerprint: key.fingerprint(),
        }
    }

    pub fn key_fingerprint(&self) -> &str {
        &self.key_fingerprint
    }

    pub fn encrypt(
        &self,
        plaintext: &[u8],
        file_name: &str,
        entity_type: EntityType,
        entity_id: u64,
    ) -> Result<EncryptedFileData, TrustError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = associated_data(file_name, entity_type, entity_id);
        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| {
                error!("Encryption of {} failed: {}", file_name, e);
                TrustError::Crypto(format!("Encryption failed: {}", e))
            })?;

        let mut encrypted_data = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        encrypted_data.extend_from_slice(&nonce_bytes);
        encrypted_data.extend_from_slice(&ciphertext);

        let nonce_base64 = STANDARD.encode(nonce_bytes);
        let metadata = EncryptionMetadata {
            file_name: file_name.to_string(),
            entity_type,
            entity_id,
            algorithm: ALGORITHM.to_string(),
            nonce: nonce_base64.clone(),
            created_at: Utc::now(),
        };

        info!(
            "Encrypted {} for {} {}: {} bytes -> {} bytes",
            file_name,
            entity_type,
            entity_id,
            plaintext.len(),
            encrypted_data.len()
        );

        Ok(EncryptedFileData {
            encrypted_data,
            nonce_base64,
            metadata,
            encrypted_file_name: format!("{}{}", file_name, ENCRYPTED_SUFFIX),
        })
    }

    /// Authenticate and decrypt `nonce || ciphertext || tag`. No plaintext is
    /// returned unless the tag verifies.
    pub fn decrypt(&self, data: &[u8], metadata: &EncryptionMetadata) -> Result<Vec<u8>, TrustError> {
        if metadata.algorithm != ALGORITHM {
            return Err(TrustError::Crypto(format!(
                "Unsupported algorithm: {}",
                metadata.algorithm
            )));
        }
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(TrustError::Crypto(format!(
                "Encrypted data too short: {} bytes",
                data.len()
            )));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let recorded_nonce = STANDARD
            .decode(&metadata.nonce)
            .map_err(|e| TrustError::Crypto(format!("Invalid nonce in metadata: {}", e)))?;
        if recorded_nonce != nonce_bytes {
            return Err(TrustError::Crypto(
                "Nonce does not match encryption metadata".to_string(),
            ));
        }

        let aad = metadata.associated_data();
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                error!("Authentication failed decrypting {}", metadata.file_name);
                TrustError::Crypto("Decryption failed: authentication tag mismatch".to_string())
            })?;

        debug!(
            "Decrypted {}: {} bytes -> {} bytes",
            metadata.file_name,
            data.len(),
            plaintext.len()
        );
        Ok(plaintext)
    }
}

impl std::fmt::Debug for FileEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEncryptor")
            .field("key_fingerprint", &self.key_fingerprint)
            .finish()
    }
}
