//! Cryptographic primitives: master key management, key derivation,
//! context-bound AEAD, and zeroized memory wrappers.

pub mod engine;
pub mod key_derivation;
pub mod master_key;
pub mod secure_memory;

pub use engine::{CredentialEncryptionEngine, EncryptionHealth, EncryptionStatus, KeyUsageStats};
pub use key_derivation::{derive_key, generate_salt, KeyDerivationParams};
pub use master_key::{
    decrypt_with_master_key, derive_master_key, encrypt_with_master_key, generate_master_key,
    validate_master_key,
};
pub use secure_memory::{secure_clear, MasterKey, SecretString, MASTER_KEY_LEN};
