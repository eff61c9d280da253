//! Key derivation using Argon2id
//!
//! Turns low-entropy input material (the machine-identity fallback path)
//! into a 256-bit key suitable for AES-256-GCM.

use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

use super::secure_memory::MasterKey;
use crate::error::{Result, VaultError};

/// Parameters for Argon2id key derivation
#[derive(Debug, Clone)]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> String {
    SaltString::generate(&mut OsRng).to_string()
}

/// Derive a 256-bit key from arbitrary input material using Argon2id.
///
/// Deterministic: the same material and salt always produce the same key,
/// which is what the derived-key fallback path relies on.
pub fn derive_key(
    material: &[u8],
    salt: &str,
    params: Option<KeyDerivationParams>,
) -> Result<MasterKey> {
    if material.is_empty() {
        return Err(VaultError::InvalidInput(
            "key derivation material must not be empty".to_string(),
        ));
    }

    let params = params.unwrap_or_default();

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32), // Output length: 32 bytes = 256 bits
    )
    .map_err(|e| VaultError::ConfigurationError(format!("invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let salt = SaltString::from_b64(salt)
        .map_err(|e| VaultError::ConfigurationError(format!("invalid salt: {}", e)))?;

    let password_hash = argon2
        .hash_password(material, &salt)
        .map_err(|e| VaultError::EncryptionFailed(format!("key derivation failed: {}", e)))?;

    let hash = password_hash
        .hash
        .ok_or_else(|| VaultError::EncryptionFailed("key derivation produced no hash".to_string()))?;

    let hash_bytes = hash.as_bytes();
    if hash_bytes.len() < 32 {
        return Err(VaultError::EncryptionFailed(
            "key derivation output too short".to_string(),
        ));
    }

    MasterKey::from_slice(&hash_bytes[..32])
}
