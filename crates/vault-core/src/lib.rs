//! # vault-core
//!
//! Secure credential storage for the MailPilot desktop app:
//! - AES-256-GCM authenticated encryption, context-bound per credential
//! - Master key protected by the OS key store (DPAPI, Keychain Services,
//!   libsecret) with a derived-key fallback when none is available
//! - Embedded-database persistence with a bounded read cache
//! - Background token rotation with events and statistics
//! - Append-only, sanitized security audit log

pub mod audit;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod platform;
pub mod rotation;
pub mod store;

pub use audit::{AuditEventType, AuditSink, FileAuditSink, NullAuditSink, SecurityAuditEvent, TracingAuditSink};
pub use config::{ConfigManager, RotationConfigEntry, VaultConfig};
pub use credential::{EncryptedCredential, EncryptionAlgorithm};
pub use crypto::{
    decrypt_with_master_key, derive_master_key, encrypt_with_master_key, generate_master_key,
    secure_clear, validate_master_key, CredentialEncryptionEngine, EncryptionHealth,
    EncryptionStatus, KeyUsageStats, MasterKey, SecretString,
};
pub use error::{Result, VaultError};
pub use manager::{GmailTokenType, SecureStorageManager, StorageHealth, VaultState, OPENAI_API_KEY};
pub use platform::{Platform, PlatformKeyStore};
pub use rotation::{
    ProviderRotationStats, RefreshedTokens, RotationEvent, RotationOutcome, RotationSettings,
    RotationStatistics, TokenRefresher, TokenRotationScheduler,
};
pub use store::CredentialStore;
