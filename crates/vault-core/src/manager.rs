//! Secure storage manager
//!
//! The orchestrator over the encryption engine and the credential store:
//! input validation, lifecycle, a bounded read cache, provider helpers,
//! health aggregation, and audit emission. All credential mutations in
//! the subsystem flow through this type.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::audit::{AuditEventType, AuditSink, SecurityAuditEvent};
use crate::crypto::CredentialEncryptionEngine;
use crate::error::{Result, VaultError};
use crate::store::CredentialStore;

/// Fixed logical key for the OpenAI API key
pub const OPENAI_API_KEY: &str = "openai_api_key";

/// Prefix for Gmail OAuth credentials
const GMAIL_PREFIX: &str = "gmail_";

/// Manager lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
}

/// Which Gmail OAuth token a helper call refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmailTokenType {
    Access,
    Refresh,
}

impl GmailTokenType {
    /// The logical key this token is stored under
    pub fn logical_key(&self) -> String {
        match self {
            GmailTokenType::Access => format!("{}access_token", GMAIL_PREFIX),
            GmailTokenType::Refresh => format!("{}refresh_token", GMAIL_PREFIX),
        }
    }
}

/// Aggregated health report
#[derive(Debug, Clone)]
pub struct StorageHealth {
    pub is_healthy: bool,
    pub status: String,
    pub issues: Vec<String>,
}

/// Bounded read cache with insertion-order eviction
struct ReadCache {
    capacity: usize,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl ReadCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    /// Insert or overwrite; evicts the oldest entry at capacity.
    fn insert(&mut self, key: &str, value: String) {
        if self.entries.insert(key.to_string(), value).is_none() {
            self.order.push_back(key.to_string());
            while self.entries.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
    }

    /// Insert only when the key is absent (read-repopulation path:
    /// a concurrent write's fresher value must not be clobbered).
    fn insert_if_absent(&mut self, key: &str, value: String) {
        if !self.entries.contains_key(key) {
            self.insert(key, value);
        }
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Orchestrates encryption, persistence, caching, and auditing
pub struct SecureStorageManager {
    engine: Arc<CredentialEncryptionEngine>,
    store: Arc<CredentialStore>,
    audit: Arc<dyn AuditSink>,
    state: RwLock<VaultState>,
    cache: RwLock<ReadCache>,
}

impl SecureStorageManager {
    /// Construct an uninitialized manager; call [`initialize`](Self::initialize)
    /// before any credential operation.
    pub fn new(
        engine: Arc<CredentialEncryptionEngine>,
        store: Arc<CredentialStore>,
        audit: Arc<dyn AuditSink>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            engine,
            store,
            audit,
            state: RwLock::new(VaultState::Uninitialized),
            cache: RwLock::new(ReadCache::new(cache_capacity)),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> VaultState {
        *self.state.read().await
    }

    /// Initialize the engine and probe the store.
    ///
    /// Idempotent after success: repeated calls return without touching
    /// the encryption engine again.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                VaultState::Ready => {
                    debug!("Secure storage already initialized");
                    return Ok(());
                }
                VaultState::Initializing => {
                    return Err(VaultError::ConfigurationError(
                        "initialization already in progress".to_string(),
                    ));
                }
                _ => *state = VaultState::Initializing,
            }
        }

        let result: Result<()> = async {
            self.engine.initialize().await?;
            self.store.health_check()?;
            Ok(())
        }
        .await;

        let mut state = self.state.write().await;
        match result {
            Ok(()) => {
                *state = VaultState::Ready;
                self.audit
                    .log_event(&SecurityAuditEvent::success(AuditEventType::VaultInitialized));
                info!("Secure storage manager ready");
                Ok(())
            }
            Err(e) => {
                *state = VaultState::Uninitialized;
                self.audit.log_event(&SecurityAuditEvent::failure(
                    AuditEventType::VaultInitialized,
                    &e.to_string(),
                ));
                Err(e)
            }
        }
    }

    /// Clear the cache, drop key material, and return to `Uninitialized`.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            *state = VaultState::ShuttingDown;
        }

        self.cache.write().await.clear();
        self.engine.shutdown().await;

        let mut state = self.state.write().await;
        *state = VaultState::Uninitialized;

        self.audit
            .log_event(&SecurityAuditEvent::success(AuditEventType::VaultShutdown));
        info!("Secure storage manager shut down");
    }

    async fn ensure_ready(&self) -> Result<()> {
        match *self.state.read().await {
            VaultState::Ready => Ok(()),
            _ => Err(VaultError::NotInitialized),
        }
    }

    /// Encrypt and persist a credential under a logical key.
    pub async fn store_credential(&self, key: &str, value: &str) -> Result<()> {
        self.store_credential_with_expiry(key, value, None).await
    }

    /// Encrypt and persist with an expiry timestamp (OAuth access tokens).
    ///
    /// Atomic: if encryption fails, nothing is persisted; the single
    /// upsert is the only write.
    pub async fn store_credential_with_expiry(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        validate_key_and_value(key, value)?;
        self.ensure_ready().await?;

        let result: Result<()> = async {
            let mut record = self.engine.encrypt(value, key).await?;
            record.expires_at = expires_at;
            let blob = record.to_json()?;
            self.store.set(key, &blob, expires_at)?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.cache.write().await.insert(key, value.to_string());
                self.audit.log_event(
                    &SecurityAuditEvent::success(AuditEventType::CredentialStored)
                        .with_metadata("key", key),
                );
                debug!(key = %key, "Stored credential");
                Ok(())
            }
            Err(e) => {
                self.audit.log_event(
                    &SecurityAuditEvent::failure(AuditEventType::CredentialStored, &e.to_string())
                        .with_metadata("key", key),
                );
                Err(e)
            }
        }
    }

    /// Retrieve and decrypt a credential.
    ///
    /// A missing entry and an entry that fails decryption both surface
    /// as `NotFound`; the corrupted row is removed so later existence
    /// probes agree with this answer.
    pub async fn retrieve_credential(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        self.ensure_ready().await?;

        if let Some(value) = self.cache.read().await.get(key) {
            debug!(key = %key, "Credential cache hit");
            return Ok(value.clone());
        }

        let blob = match self.store.get(key)? {
            Some(blob) => blob,
            None => return Err(VaultError::NotFound(key.to_string())),
        };

        let decrypted = async {
            let record = crate::credential::EncryptedCredential::from_json(&blob)?;
            self.engine.decrypt(&record, key).await
        }
        .await;

        match decrypted {
            Ok(secret) => {
                let value = secret.into_inner();
                self.cache
                    .write()
                    .await
                    .insert_if_absent(key, value.clone());
                self.audit.log_event(
                    &SecurityAuditEvent::success(AuditEventType::CredentialRetrieved)
                        .with_metadata("key", key),
                );
                Ok(value)
            }
            Err(VaultError::DecryptionFailed(reason)) => {
                // Corruption is presented to callers as absence
                warn!(key = %key, "Removing credential that failed decryption");
                let _ = self.store.remove(key);
                self.cache.write().await.remove(key);
                self.audit.log_event(
                    &SecurityAuditEvent::failure(AuditEventType::CorruptionDetected, &reason)
                        .with_metadata("key", key),
                );
                Err(VaultError::NotFound(key.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a credential from cache and store. Idempotent.
    pub async fn remove_credential(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.ensure_ready().await?;

        self.cache.write().await.remove(key);
        let existed = self.store.remove(key)?;

        self.audit.log_event(
            &SecurityAuditEvent::success(AuditEventType::CredentialRemoved)
                .with_metadata("key", key)
                .with_metadata("existed", if existed { "true" } else { "false" }),
        );
        debug!(key = %key, existed = existed, "Removed credential");
        Ok(())
    }

    /// Existence probe; never attempts decryption.
    pub async fn credential_exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.ensure_ready().await?;

        if self.cache.read().await.get(key).is_some() {
            return Ok(true);
        }
        Ok(self.store.get(key)?.is_some())
    }

    /// All logical keys currently persisted.
    pub async fn stored_credential_keys(&self) -> Result<BTreeSet<String>> {
        self.ensure_ready().await?;
        Ok(self.store.list_keys()?.into_iter().collect())
    }

    /// Expiry metadata for a stored credential, without decryption.
    ///
    /// `Ok(None)` covers both an absent credential and one stored without
    /// an expiry; callers needing the distinction probe existence first.
    pub async fn credential_expiry(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        validate_key(key)?;
        self.ensure_ready().await?;
        Ok(self.store.get_expiry(key)?.flatten())
    }

    /// Store a Gmail OAuth token under its `gmail_`-prefixed key.
    pub async fn store_gmail_token(&self, token_type: GmailTokenType, value: &str) -> Result<()> {
        self.store_credential(&token_type.logical_key(), value).await
    }

    /// Store a Gmail OAuth token with expiry metadata.
    pub async fn store_gmail_token_with_expiry(
        &self,
        token_type: GmailTokenType,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.store_credential_with_expiry(&token_type.logical_key(), value, expires_at)
            .await
    }

    /// Retrieve a Gmail OAuth token.
    pub async fn retrieve_gmail_token(&self, token_type: GmailTokenType) -> Result<String> {
        self.retrieve_credential(&token_type.logical_key()).await
    }

    /// Store the OpenAI API key under its fixed logical key.
    pub async fn store_openai_key(&self, value: &str) -> Result<()> {
        self.store_credential(OPENAI_API_KEY, value).await
    }

    /// Retrieve the OpenAI API key.
    pub async fn retrieve_openai_key(&self) -> Result<String> {
        self.retrieve_credential(OPENAI_API_KEY).await
    }

    /// Aggregate health: encryption engine probes plus a store probe.
    pub async fn health_check(&self) -> StorageHealth {
        if *self.state.read().await != VaultState::Ready {
            return StorageHealth {
                is_healthy: false,
                status: "not initialized".to_string(),
                issues: vec!["secure storage manager is not initialized".to_string()],
            };
        }

        let encryption = self.engine.health_check().await;
        let mut issues = encryption.issues.clone();

        let store_healthy = match self.store.health_check() {
            Ok(()) => true,
            Err(e) => {
                issues.push(format!("credential store: {}", e));
                false
            }
        };

        let is_healthy = encryption.is_healthy && store_healthy;
        let status = if is_healthy {
            if issues.is_empty() {
                "healthy".to_string()
            } else {
                "healthy (degraded protection)".to_string()
            }
        } else {
            "unhealthy".to_string()
        };

        self.audit.log_event(
            &SecurityAuditEvent::success(AuditEventType::HealthCheck)
                .with_metadata("status", &status),
        );

        StorageHealth {
            is_healthy,
            status,
            issues,
        }
    }

    /// Number of entries currently cached (monitoring/tests)
    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(VaultError::InvalidInput(
            "credential key must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_key_and_value(key: &str, value: &str) -> Result<()> {
    validate_key(key)?;
    if value.is_empty() {
        return Err(VaultError::InvalidInput(
            "credential value must not be empty".to_string(),
        ));
    }
    Ok(())
}
