//! Cryptographic primitives: file encryption, signing keys, attestations.

pub mod attestation;
pub mod encryption;
pub mod keys;
pub mod signing;

pub use encryption::{EncryptedFileData, EncryptionMetadata, FileEncryptor};
pub use keys::MasterKey;
pub use signing::SigningKey;
