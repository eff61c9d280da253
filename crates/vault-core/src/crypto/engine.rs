//! Credential encryption engine
//!
//! Application-level AEAD keyed by a context string. The master key comes
//! from the OS key store when one is usable, otherwise from the
//! deterministic derived-key fallback. The context string is bound to
//! every ciphertext as AEAD associated data, so a record decrypts only
//! under the context it was written for - on every platform.

use std::collections::HashMap;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::master_key::{decode_master_key, derive_master_key, generate_master_key, validate_master_key};
use super::secure_memory::{secure_clear, MasterKey, SecretString};
use crate::credential::{EncryptedCredential, EncryptionAlgorithm};
use crate::error::{Result, VaultError};
use crate::platform::{Platform, PlatformKeyStore};

/// Context used for the initialization self-test
const SELF_TEST_CONTEXT: &str = "vault_self_test";

/// Per-context encryption telemetry, created lazily on first use
#[derive(Debug, Clone, Default)]
pub struct KeyUsageStats {
    pub encryption_count: u64,
    pub decryption_count: u64,
    pub total_bytes_encrypted: u64,
    pub total_bytes_decrypted: u64,
    pub last_usage_at: Option<DateTime<Utc>>,
}

/// Result of a live health probe
#[derive(Debug, Clone)]
pub struct EncryptionHealth {
    pub is_healthy: bool,
    pub can_encrypt: bool,
    pub can_decrypt: bool,
    pub key_generation_works: bool,
    pub issues: Vec<String>,
}

/// Current platform and protection method
#[derive(Debug, Clone)]
pub struct EncryptionStatus {
    pub platform: Platform,
    pub encryption_method: &'static str,
    pub is_initialized: bool,
}

/// Context-bound AEAD over the process master key
pub struct CredentialEncryptionEngine {
    /// OS protection for the master key at rest
    key_store: PlatformKeyStore,
    /// Cached master key; present once initialize() has succeeded
    master_key: RwLock<Option<MasterKey>>,
    /// Per-context usage telemetry
    usage: RwLock<HashMap<String, KeyUsageStats>>,
}

impl CredentialEncryptionEngine {
    /// Create an engine over the given platform key store.
    ///
    /// No key material is loaded until [`initialize`](Self::initialize).
    pub fn new(key_store: PlatformKeyStore) -> Self {
        Self {
            key_store,
            master_key: RwLock::new(None),
            usage: RwLock::new(HashMap::new()),
        }
    }

    /// Load or create the master key and run a self-test round trip.
    ///
    /// Idempotent: once initialized, repeated calls return immediately
    /// without touching the key store again.
    pub async fn initialize(&self) -> Result<()> {
        // The write lock is held across load/create so concurrent
        // initializers cannot protect two different keys.
        let mut slot = self.master_key.write().await;
        if slot.is_some() {
            debug!("Encryption engine already initialized");
            return Ok(());
        }

        let key = if self.key_store.is_available() {
            self.load_or_create_protected_key()?
        } else {
            info!("Using derived master key (no OS key store)");
            let key_b64 = derive_master_key()?;
            decode_master_key(&key_b64)?
        };

        // Self-test before anything is allowed to depend on the key
        self.round_trip_probe(&key)?;

        *slot = Some(key);

        info!(
            platform = %self.key_store.platform(),
            method = self.key_store.platform().method_name(),
            "Encryption engine initialized"
        );
        Ok(())
    }

    /// True once initialize() has succeeded
    pub async fn is_initialized(&self) -> bool {
        self.master_key.read().await.is_some()
    }

    /// Encrypt a plaintext bound to a context string.
    pub async fn encrypt(&self, plaintext: &str, context: &str) -> Result<EncryptedCredential> {
        if plaintext.is_empty() {
            return Err(VaultError::InvalidInput(
                "plaintext must not be empty".to_string(),
            ));
        }
        if context.is_empty() {
            return Err(VaultError::InvalidInput(
                "context must not be empty".to_string(),
            ));
        }

        let guard = self.master_key.read().await;
        let key = guard.as_ref().ok_or(VaultError::NotInitialized)?;

        let record = encrypt_bound(plaintext.as_bytes(), context, key)?;

        drop(guard);
        self.record_usage(context, plaintext.len() as u64, 0).await;

        Ok(record)
    }

    /// Decrypt a record under the context it was written for.
    ///
    /// A wrong context fails authentication exactly like tampering does.
    pub async fn decrypt(&self, record: &EncryptedCredential, context: &str) -> Result<SecretString> {
        if record.ciphertext.is_empty() {
            return Err(VaultError::InvalidInput(
                "encrypted value must not be empty".to_string(),
            ));
        }
        if context.is_empty() {
            return Err(VaultError::InvalidInput(
                "context must not be empty".to_string(),
            ));
        }

        let guard = self.master_key.read().await;
        let key = guard.as_ref().ok_or(VaultError::NotInitialized)?;

        let plaintext = decrypt_bound(record, context, key)?;

        drop(guard);
        self.record_usage(context, 0, plaintext.len() as u64).await;

        Ok(plaintext)
    }

    /// Live health probe: key generation, encrypt, decrypt.
    ///
    /// Never assumes health from prior state - every call exercises the
    /// primitives again.
    pub async fn health_check(&self) -> EncryptionHealth {
        let mut issues = Vec::new();

        let key_generation_works = {
            let candidate = generate_master_key();
            match validate_master_key(&candidate) {
                Ok(()) => true,
                Err(e) => {
                    issues.push(format!("key generation: {}", e));
                    false
                }
            }
        };

        let (can_encrypt, can_decrypt) = if !self.is_initialized().await {
            issues.push("engine is not initialized".to_string());
            (false, false)
        } else {
            let can_encrypt = match self.encrypt("health-probe", SELF_TEST_CONTEXT).await {
                Ok(_) => true,
                Err(e) => {
                    issues.push(format!("encrypt probe: {}", e));
                    false
                }
            };
            let can_decrypt = match self.encrypt("health-probe", SELF_TEST_CONTEXT).await {
                Ok(record) => match self.decrypt(&record, SELF_TEST_CONTEXT).await {
                    Ok(plain) if plain.expose() == "health-probe" => true,
                    Ok(_) => {
                        issues.push("decrypt probe returned wrong plaintext".to_string());
                        false
                    }
                    Err(e) => {
                        issues.push(format!("decrypt probe: {}", e));
                        false
                    }
                },
                Err(e) => {
                    issues.push(format!("decrypt probe (encrypt step): {}", e));
                    false
                }
            };
            (can_encrypt, can_decrypt)
        };

        if !self.key_store.is_available() {
            // Degraded but functional; surfaced, not failed
            issues.push("OS key store unavailable, running on derived key".to_string());
        }

        EncryptionHealth {
            is_healthy: can_encrypt && can_decrypt && key_generation_works,
            can_encrypt,
            can_decrypt,
            key_generation_works,
            issues,
        }
    }

    /// Platform, protection method, and initialization state
    pub async fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus {
            platform: self.key_store.platform(),
            encryption_method: self.key_store.platform().method_name(),
            is_initialized: self.is_initialized().await,
        }
    }

    /// Usage telemetry for one context, if it has been used
    pub async fn usage_stats(&self, context: &str) -> Option<KeyUsageStats> {
        self.usage.read().await.get(context).cloned()
    }

    /// Snapshot of all per-context telemetry
    pub async fn all_usage_stats(&self) -> HashMap<String, KeyUsageStats> {
        self.usage.read().await.clone()
    }

    /// Drop all usage telemetry
    pub async fn clear_usage_stats(&self) {
        self.usage.write().await.clear();
    }

    /// Discard the cached master key, zeroizing it.
    ///
    /// The next initialize() reloads from the key store; old buffers are
    /// never mutated in place.
    pub async fn shutdown(&self) {
        let mut slot = self.master_key.write().await;
        // ZeroizeOnDrop wipes the discarded key
        *slot = None;
        debug!("Encryption engine shut down, master key cleared");
    }

    fn load_or_create_protected_key(&self) -> Result<MasterKey> {
        match self.key_store.unprotect()? {
            Some(mut raw) => {
                let key = MasterKey::from_slice(&raw);
                secure_clear(&mut raw);
                match key {
                    Ok(key) => {
                        debug!("Loaded master key from OS key store");
                        Ok(key)
                    }
                    Err(_) => {
                        // A payload of the wrong shape cannot be used;
                        // replace it rather than fail every startup
                        warn!("Stored master key has invalid length, regenerating");
                        self.create_protected_key()
                    }
                }
            }
            None => self.create_protected_key(),
        }
    }

    fn create_protected_key(&self) -> Result<MasterKey> {
        let key_b64 = generate_master_key();
        let key = decode_master_key(&key_b64)?;
        self.key_store.protect(key.as_bytes())?;
        info!("Generated and protected a new master key");
        Ok(key)
    }

    fn round_trip_probe(&self, key: &MasterKey) -> Result<()> {
        let record = encrypt_bound(b"self-test", SELF_TEST_CONTEXT, key)?;
        let plain = decrypt_bound(&record, SELF_TEST_CONTEXT, key)?;
        if plain.expose() != "self-test" {
            return Err(VaultError::EncryptionFailed(
                "self-test round trip mismatch".to_string(),
            ));
        }
        Ok(())
    }

    async fn record_usage(&self, context: &str, encrypted: u64, decrypted: u64) {
        let mut usage = self.usage.write().await;
        let stats = usage.entry(context.to_string()).or_default();
        if encrypted > 0 {
            stats.encryption_count += 1;
            stats.total_bytes_encrypted += encrypted;
        }
        if decrypted > 0 {
            stats.decryption_count += 1;
            stats.total_bytes_decrypted += decrypted;
        }
        stats.last_usage_at = Some(Utc::now());
    }
}

/// AEAD encrypt with the context as associated data
fn encrypt_bound(plaintext: &[u8], context: &str, key: &MasterKey) -> Result<EncryptedCredential> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let mut iv = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let payload = Payload {
        msg: plaintext,
        aad: context.as_bytes(),
    };

    // aes-gcm appends the auth tag to the ciphertext
    let mut ciphertext_with_tag = cipher
        .encrypt(nonce, payload)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    if ciphertext_with_tag.len() < 16 {
        return Err(VaultError::EncryptionFailed(
            "ciphertext too short".to_string(),
        ));
    }

    let tag_start = ciphertext_with_tag.len() - 16;
    let mut auth_tag = [0u8; 16];
    auth_tag.copy_from_slice(&ciphertext_with_tag[tag_start..]);
    ciphertext_with_tag.truncate(tag_start);

    Ok(EncryptedCredential {
        ciphertext: ciphertext_with_tag,
        iv,
        auth_tag,
        algorithm: EncryptionAlgorithm::Aes256Gcm,
        key_id: context.to_string(),
        created_at: Utc::now(),
        expires_at: None,
        metadata: Default::default(),
    })
}

/// AEAD decrypt, authenticating the context
fn decrypt_bound(record: &EncryptedCredential, context: &str, key: &MasterKey) -> Result<SecretString> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&record.iv);

    let mut ciphertext_with_tag = record.ciphertext.clone();
    ciphertext_with_tag.extend_from_slice(&record.auth_tag);

    let payload = Payload {
        msg: &ciphertext_with_tag,
        aad: context.as_bytes(),
    };

    let mut plaintext_bytes = cipher
        .decrypt(nonce, payload)
        .map_err(|_| VaultError::DecryptionFailed("authentication failed".to_string()))?;

    let plaintext = match String::from_utf8(plaintext_bytes.clone()) {
        Ok(s) => s,
        Err(e) => {
            secure_clear(&mut plaintext_bytes);
            return Err(VaultError::DecryptionFailed(format!("invalid UTF-8: {}", e)));
        }
    };
    secure_clear(&mut plaintext_bytes);

    Ok(SecretString::new(plaintext))
}
