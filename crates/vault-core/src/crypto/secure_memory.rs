//! Secure memory handling with automatic zeroization
//!
//! Key material and decrypted secrets are wrapped in types that zero
//! their buffers on drop and redact themselves in debug output.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// Length of the master key in bytes (256 bits)
pub const MASTER_KEY_LEN: usize = 32;

/// Master encryption key - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    /// Create a new master key from raw bytes
    pub fn new(key: [u8; MASTER_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Create from a slice; fails unless the slice is exactly 32 bytes
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != MASTER_KEY_LEN {
            return Err(VaultError::InvalidInput(format!(
                "master key must be {} bytes, got {}",
                MASTER_KEY_LEN,
                slice.len()
            )));
        }
        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(slice);
        Ok(Self { key })
    }

    /// Get the key bytes (use carefully - avoid copying)
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.key
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self { key: self.key }
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Decrypted credential value - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Wrap a decrypted value
    pub fn new(value: String) -> Self {
        Self { value }
    }

    /// Get the secret value (use carefully)
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Consume and return the inner value
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.value)
    }

    /// Length in bytes of the wrapped value
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// True when the wrapped value is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretString")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Overwrite a sensitive scratch buffer with zero bytes.
///
/// Used on every discard path for intermediate key material and
/// plaintext copies that live outside the wrapper types above.
pub fn secure_clear(buffer: &mut [u8]) {
    buffer.zeroize();
}
