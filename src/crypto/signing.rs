//! secp256k1 signing keys
//!
//! Keys identify callers on the ledger (their [`Identity`] is derived from
//! the public key) and sign judgment attestations.

use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::TrustError;
use crate::ledger::identity::Identity;

pub struct SigningKey {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl SigningKey {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secp,
            secret_key,
            public_key,
        }
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self, TrustError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| TrustError::Crypto(format!("Invalid secret key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| TrustError::Crypto(format!("Invalid secret key: {}", e)))?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secp,
            secret_key,
            public_key,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrustError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TrustError::Crypto(format!("Failed to read key file {:?}: {}", path, e)))?;
        Self::from_hex(&contents)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TrustError> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        // mode() only applies on creation; tighten an existing file too
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(self.secret_hex().as_bytes())?;
        file.sync_all()?;
        info!("Wrote signing key for {} to {:?}", self.identity(), path);
        Ok(())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn identity(&self) -> Identity {
        Identity::from_public_key(&self.public_key)
    }

    /// Compact ECDSA signature over SHA-256(message), hex encoded.
    pub fn sign(&self, message: &str) -> Result<String, TrustError> {
        let digest = message_digest(message)?;
        let signature = self.secp.sign_ecdsa(&digest, &self.secret_key);
        Ok(hex::encode(signature.serialize_compact()))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("identity", &self.identity())
            .finish()
    }
}

fn message_digest(message: &str) -> Result<Message, TrustError> {
    let hash = Sha256::digest(message.as_bytes());
    Message::from_digest_slice(&hash)
        .map_err(|e| TrustError::Crypto(format!("Invalid message hash: {}", e)))
}

pub fn parse_public_key(public_key_hex: &str) -> Result<PublicKey, TrustError> {
    let bytes = hex::decode(public_key_hex.trim())
        .map_err(|e| TrustError::Crypto(format!("Invalid public key hex: {}", e)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|e| TrustError::Crypto(format!("Invalid public key: {}", e)))
}

/// Check a hex compact signature produced by [`SigningKey::sign`].
/// Malformed signatures are an error; a well-formed wrong signature is `false`.
pub fn verify_message(message: &str, signature_hex: &str, public_key: &PublicKey) -> Result<bool, TrustError> {
    let bytes = hex::decode(signature_hex.trim())
        .map_err(|e| TrustError::Crypto(format!("Invalid signature hex: {}", e)))?;
    let signature = Signature::from_compact(&bytes)
        .map_err(|e| TrustError::Crypto(format!("Invalid signature format: {}", e)))?;
    let digest = message_digest(message)?;

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_ecdsa(&digest, &signature, public_key).is_ok())
}
