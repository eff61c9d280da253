//! Platform key store
//!
//! Thin capability layer over each OS's native secret protection:
//! - Windows: Credential Manager (DPAPI)
//! - macOS: Keychain Services
//! - Linux: Secret Service (libsecret / GNOME Keyring / KWallet)
//!
//! The store holds exactly one opaque payload - the protected master key.
//! Raw key material never reaches this module's callers' disk; what the
//! OS persists is its own protected representation.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::Entry;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};

/// Keyring entry used for the availability probe
const PROBE_ENTRY: &str = "__availability_probe__";

/// Runtime platform, detected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    /// No usable OS secret store (headless Linux, locked keychain, ...)
    Unavailable,
}

impl Platform {
    /// The compile-target platform, before any availability probe
    fn compile_target() -> Platform {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unavailable
        }
    }

    /// Human-readable protection method for status reporting
    pub fn method_name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows DPAPI",
            Platform::MacOs => "macOS Keychain Services",
            Platform::Linux => "Linux libsecret",
            Platform::Unavailable => "derived key (no OS protection)",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Linux => write!(f, "linux"),
            Platform::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// OS-native protection for the master key
pub struct PlatformKeyStore {
    /// Keyring service name (namespaces entries per application)
    service: String,
    /// Entry name the protected payload lives under
    entry_name: String,
    /// Detected platform; `Unavailable` when the probe failed
    platform: Platform,
}

impl PlatformKeyStore {
    /// Detect the platform and probe the OS secret store.
    ///
    /// The probe writes and deletes a throwaway entry; a store that cannot
    /// complete that round trip is reported as `Unavailable` so the
    /// encryption engine falls back to the derived-key path.
    pub fn new(service: &str, entry_name: &str) -> Self {
        let target = Platform::compile_target();
        let platform = if target != Platform::Unavailable && Self::probe(service) {
            target
        } else {
            Platform::Unavailable
        };

        match platform {
            Platform::Unavailable => {
                warn!(service = %service, "OS key store unavailable, falling back to derived key");
            }
            _ => {
                debug!(service = %service, platform = %platform, "OS key store available");
            }
        }

        Self {
            service: service.to_string(),
            entry_name: entry_name.to_string(),
            platform,
        }
    }

    /// Construct an explicitly unavailable store (tests, forced fallback)
    pub fn unavailable(service: &str, entry_name: &str) -> Self {
        Self {
            service: service.to_string(),
            entry_name: entry_name.to_string(),
            platform: Platform::Unavailable,
        }
    }

    fn probe(service: &str) -> bool {
        match Entry::new(service, PROBE_ENTRY) {
            Ok(entry) => {
                if entry.set_password("probe").is_ok() {
                    let _ = entry.delete_password();
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Detected platform
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Whether OS protection is usable
    pub fn is_available(&self) -> bool {
        self.platform != Platform::Unavailable
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry_name)
            .map_err(|e| VaultError::ConfigurationError(format!("keyring entry: {}", e)))
    }

    /// Hand bytes to the OS for protection.
    ///
    /// The OS store persists its own protected representation; this
    /// module only ever sees the opaque round trip.
    pub fn protect(&self, payload: &[u8]) -> Result<()> {
        if !self.is_available() {
            return Err(VaultError::ConfigurationError(
                "OS key store is not available on this platform".to_string(),
            ));
        }

        let entry = self.entry()?;
        let encoded = BASE64.encode(payload);
        entry
            .set_password(&encoded)
            .map_err(|e| VaultError::StorageError(format!("keyring protect: {}", e)))?;

        debug!(entry = %self.entry_name, "Protected payload in OS key store");
        Ok(())
    }

    /// Retrieve previously protected bytes, `None` when nothing is stored.
    pub fn unprotect(&self) -> Result<Option<Vec<u8>>> {
        if !self.is_available() {
            return Err(VaultError::ConfigurationError(
                "OS key store is not available on this platform".to_string(),
            ));
        }

        let entry = self.entry()?;
        match entry.get_password() {
            Ok(encoded) => {
                let payload = BASE64.decode(&encoded).map_err(|e| {
                    VaultError::StorageError(format!("corrupt keyring payload: {}", e))
                })?;
                debug!(entry = %self.entry_name, "Unprotected payload from OS key store");
                Ok(Some(payload))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::StorageError(format!("keyring unprotect: {}", e))),
        }
    }

    /// Remove the protected payload; absent entries are fine.
    pub fn forget(&self) -> Result<()> {
        if !self.is_available() {
            return Ok(());
        }

        let entry = self.entry()?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VaultError::StorageError(format!("keyring forget: {}", e))),
        }
    }
}
