//! Caller identities
//!
//! Every caller of the ledger is an address-like handle: `0x` followed by
//! 40 lowercase hex characters. Handles are derived from secp256k1 public
//! keys so an operator's key file determines who they act as.

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::TrustError;

const ADDRESS_HEX_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Derive the handle for a public key: the last 20 bytes of
    /// SHA-256 over the compressed key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Sha256::digest(public_key.serialize());
        Self(format!("0x{}", hex::encode(&digest[12..])))
    }

    pub fn from_secret_key(secret_key: &SecretKey) -> Self {
        let secp = Secp256k1::new();
        Self::from_public_key(&PublicKey::from_secret_key(&secp, secret_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| TrustError::Validation(format!("identity must start with 0x: {}", s)))?;

        if hex_part.len() != ADDRESS_HEX_LEN || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TrustError::Validation(format!(
                "identity must be 0x followed by {} hex characters: {}",
                ADDRESS_HEX_LEN, s
            )));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Identity {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_parse_normalises_case() {
        let identity: Identity = "0xABCDEF0123456789abcdef0123456789ABCDEF01".parse().unwrap();
        assert_eq!(identity.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("abcdef0123456789abcdef0123456789abcdef01".parse::<Identity>().is_err());
        assert!("0x1234".parse::<Identity>().is_err());
        assert!("0xzzcdef0123456789abcdef0123456789abcdef01".parse::<Identity>().is_err());
    }

    #[test]
    fn test_derived_identity_is_stable() {
        let secret_key = SecretKey::new(&mut OsRng);
        let first = Identity::from_secret_key(&secret_key);
        let second = Identity::from_secret_key(&secret_key);
        assert_eq!(first, second);
        assert!(first.as_str().parse::<Identity>().is_ok());
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let json = "\"0x0000000000000000000000000000000000000001\"";
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&identity).unwrap(), json);
        assert!(serde_json::from_str::<Identity>("\"not-an-address\"").is_err());
    }
}
