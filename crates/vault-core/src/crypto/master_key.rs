//! Master key management
//!
//! The master key is 32 random bytes, carried around as a base64 string
//! so it can live in the OS key store. String encryption uses AES-256-GCM
//! with a fresh random IV per call, serialized as `{iv}:{tag}:{ct}` hex.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use super::key_derivation::{derive_key, KeyDerivationParams};
use super::secure_memory::{secure_clear, MasterKey, MASTER_KEY_LEN};
use crate::error::{Result, VaultError};

/// Size of the GCM nonce in bytes (96 bits)
const IV_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits)
const TAG_LEN: usize = 16;

/// Fixed application salt for the derived-key fallback path.
/// Derivation must be reproducible across process restarts, so the salt
/// cannot be random here; the machine identity material provides the
/// per-installation variance.
const DERIVE_SALT_B64: &str = "bWFpbHBpbG90LXZhdWx0LXNhbHQ";

/// Generate a new random master key, base64-encoded.
///
/// Every call produces a fresh 32-byte key from the OS CSPRNG.
pub fn generate_master_key() -> String {
    let mut key_bytes = [0u8; MASTER_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key_bytes);
    let encoded = BASE64.encode(key_bytes);
    secure_clear(&mut key_bytes);
    encoded
}

/// Derive a deterministic master key for platforms without an OS key store.
///
/// Argon2id over stable machine identity material (username + hostname)
/// with a fixed application salt: the same machine always derives the
/// same key, so credentials survive restarts without any OS protection.
pub fn derive_master_key() -> Result<String> {
    let material = machine_identity_material();
    let key = derive_key(material.as_bytes(), DERIVE_SALT_B64, None)?;
    Ok(BASE64.encode(key.as_bytes()))
}

/// Derive with explicit Argon2 parameters (tests use cheaper settings).
pub fn derive_master_key_with_params(params: KeyDerivationParams) -> Result<String> {
    let material = machine_identity_material();
    let key = derive_key(material.as_bytes(), DERIVE_SALT_B64, Some(params))?;
    Ok(BASE64.encode(key.as_bytes()))
}

/// Validate that a master key string is base64 for exactly 32 bytes.
pub fn validate_master_key(key_b64: &str) -> Result<()> {
    decode_master_key(key_b64).map(|_| ())
}

/// Decode a base64 master key string into key material.
pub fn decode_master_key(key_b64: &str) -> Result<MasterKey> {
    if key_b64.is_empty() {
        return Err(VaultError::InvalidInput(
            "master key must not be empty".to_string(),
        ));
    }

    let mut key_bytes = BASE64
        .decode(key_b64)
        .map_err(|e| VaultError::InvalidInput(format!("master key is not valid base64: {}", e)))?;

    let key = MasterKey::from_slice(&key_bytes);
    secure_clear(&mut key_bytes);
    key
}

/// Encrypt a string with the master key.
///
/// Output format: `{iv_hex}:{auth_tag_hex}:{ciphertext_hex}`. A random IV
/// is drawn per call, so encrypting the same plaintext twice never yields
/// the same output.
pub fn encrypt_with_master_key(plaintext: &str, key_b64: &str) -> Result<String> {
    if plaintext.is_empty() {
        return Err(VaultError::InvalidInput(
            "plaintext must not be empty".to_string(),
        ));
    }
    let key = decode_master_key(key_b64)?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    // aes-gcm appends the auth tag to the ciphertext
    let ciphertext_with_tag = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    if ciphertext_with_tag.len() < TAG_LEN {
        return Err(VaultError::EncryptionFailed(
            "ciphertext too short".to_string(),
        ));
    }
    let tag_start = ciphertext_with_tag.len() - TAG_LEN;

    Ok(format!(
        "{}:{}:{}",
        hex::encode(iv),
        hex::encode(&ciphertext_with_tag[tag_start..]),
        hex::encode(&ciphertext_with_tag[..tag_start])
    ))
}

/// Decrypt a string produced by [`encrypt_with_master_key`].
///
/// Fails with `DecryptionFailed` when the key does not match or the
/// authentication tag does not verify.
pub fn decrypt_with_master_key(encrypted: &str, key_b64: &str) -> Result<String> {
    if encrypted.is_empty() {
        return Err(VaultError::InvalidInput(
            "encrypted value must not be empty".to_string(),
        ));
    }
    let key = decode_master_key(key_b64)?;

    let parts: Vec<&str> = encrypted.split(':').collect();
    if parts.len() != 3 {
        return Err(VaultError::DecryptionFailed(
            "invalid encrypted format: expected iv:tag:ciphertext".to_string(),
        ));
    }

    let iv = hex::decode(parts[0])
        .map_err(|e| VaultError::DecryptionFailed(format!("invalid IV hex: {}", e)))?;
    let tag = hex::decode(parts[1])
        .map_err(|e| VaultError::DecryptionFailed(format!("invalid auth tag hex: {}", e)))?;
    let ciphertext = hex::decode(parts[2])
        .map_err(|e| VaultError::DecryptionFailed(format!("invalid ciphertext hex: {}", e)))?;

    if iv.len() != IV_LEN {
        return Err(VaultError::DecryptionFailed(format!(
            "invalid IV length: expected {}, got {}",
            IV_LEN,
            iv.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(VaultError::DecryptionFailed(format!(
            "invalid auth tag length: expected {}, got {}",
            TAG_LEN,
            tag.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&iv);

    let mut ciphertext_with_tag = ciphertext;
    ciphertext_with_tag.extend_from_slice(&tag);

    let plaintext_bytes = cipher
        .decrypt(nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| {
            VaultError::DecryptionFailed("wrong key or corrupted data".to_string())
        })?;

    String::from_utf8(plaintext_bytes)
        .map_err(|e| VaultError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
}

/// Stable per-installation identity material for the derived-key path.
fn machine_identity_material() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string());
    format!("mailpilot-vault/{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_params() -> KeyDerivationParams {
        KeyDerivationParams {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_generate_master_key_is_valid() {
        let key = generate_master_key();
        assert!(validate_master_key(&key).is_ok());
    }

    #[test]
    fn test_generate_master_key_unique() {
        // Statistically distinct: collisions over 32 random bytes do not happen
        let keys: std::collections::HashSet<String> =
            (0..16).map(|_| generate_master_key()).collect();
        assert_eq!(keys.len(), 16);
    }

    #[test]
    fn test_derive_master_key_deterministic() {
        let key1 = derive_master_key_with_params(cheap_params()).unwrap();
        let key2 = derive_master_key_with_params(cheap_params()).unwrap();
        assert_eq!(key1, key2);
        assert!(validate_master_key(&key1).is_ok());
    }

    #[test]
    fn test_validate_master_key_rejects_bad_input() {
        assert!(validate_master_key("").is_err());
        assert!(validate_master_key("not base64 at all!!!").is_err());
        // Valid base64, wrong decoded length
        assert!(validate_master_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(validate_master_key(&BASE64.encode([0u8; 64])).is_err());
        // Exactly 32 bytes passes
        assert!(validate_master_key(&BASE64.encode([0u8; 32])).is_ok());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_master_key();
        let plaintext = "ya29.gmail-access-token-value";

        let encrypted = encrypt_with_master_key(plaintext, &key).unwrap();
        assert_ne!(encrypted, plaintext);

        let decrypted = decrypt_with_master_key(&encrypted, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_is_nondeterministic() {
        let key = generate_master_key();

        let first = encrypt_with_master_key("same plaintext", &key).unwrap();
        let second = encrypt_with_master_key("same plaintext", &key).unwrap();

        assert_ne!(first, second);
        assert_eq!(decrypt_with_master_key(&first, &key).unwrap(), "same plaintext");
        assert_eq!(decrypt_with_master_key(&second, &key).unwrap(), "same plaintext");
    }

    #[test]
    fn test_encrypt_rejects_empty_plaintext() {
        let key = generate_master_key();
        assert!(matches!(
            encrypt_with_master_key("", &key),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_encrypt_rejects_invalid_key() {
        assert!(encrypt_with_master_key("secret", "short-key").is_err());
        assert!(encrypt_with_master_key("secret", "").is_err());
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let key1 = generate_master_key();
        let key2 = generate_master_key();

        let encrypted = encrypt_with_master_key("secret", &key1).unwrap();

        assert!(matches!(
            decrypt_with_master_key(&encrypted, &key2),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_decrypt_detects_tampering() {
        let key = generate_master_key();
        let encrypted = encrypt_with_master_key("secret", &key).unwrap();

        // Flip a ciphertext nibble (last segment of iv:tag:ct)
        let mut tampered = encrypted.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        assert!(decrypt_with_master_key(&tampered, &key).is_err());
    }

    #[test]
    fn test_decrypt_rejects_malformed_input() {
        let key = generate_master_key();
        assert!(decrypt_with_master_key("", &key).is_err());
        assert!(decrypt_with_master_key("no-separators", &key).is_err());
        assert!(decrypt_with_master_key("a:b", &key).is_err());
        assert!(decrypt_with_master_key("zz:zz:zz", &key).is_err());
    }
}
