//! Encrypted credential record
//!
//! The unit the encryption engine produces and the store persists.
//! Ciphertext, IV, and auth tag are co-generated by a single AEAD call
//! and must be presented together for decryption.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// AEAD algorithm tag, immutable once a record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionAlgorithm {
    Aes256Gcm,
}

impl std::fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionAlgorithm::Aes256Gcm => write!(f, "aes-256-gcm"),
        }
    }
}

/// An encrypted credential as produced by the encryption engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedCredential {
    /// Ciphertext bytes (hex on the wire)
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,

    /// AEAD nonce, 12 bytes
    #[serde(with = "hex_array_12")]
    pub iv: [u8; 12],

    /// Authentication tag, 16 bytes
    #[serde(with = "hex_array_16")]
    pub auth_tag: [u8; 16],

    /// Algorithm the record was written with
    pub algorithm: EncryptionAlgorithm,

    /// Context string the ciphertext is bound to (e.g. "gmail_access_token")
    pub key_id: String,

    /// When the record was produced
    pub created_at: DateTime<Utc>,

    /// Optional credential expiry (OAuth access tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Free-form non-sensitive metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl EncryptedCredential {
    /// Serialize for persistence
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a persisted record.
    ///
    /// A malformed blob is reported as `DecryptionFailed` so the storage
    /// manager treats it like any other corrupted entry.
    pub fn from_json(blob: &str) -> crate::error::Result<Self> {
        serde_json::from_str(blob).map_err(|e| {
            crate::error::VaultError::DecryptionFailed(format!("malformed credential record: {}", e))
        })
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! hex_array_mod {
    ($name:ident, $len:expr) => {
        mod $name {
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(
                bytes: &[u8; $len],
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(bytes))
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<[u8; $len], D::Error> {
                let s = String::deserialize(deserializer)?;
                let decoded = hex::decode(&s).map_err(serde::de::Error::custom)?;
                decoded.as_slice().try_into().map_err(|_| {
                    serde::de::Error::custom(format!("expected {} hex-encoded bytes", $len))
                })
            }
        }
    };
}

hex_array_mod!(hex_array_12, 12);
hex_array_mod!(hex_array_16, 16);
