//! Vault configuration
//!
//! Non-sensitive settings stored as plain JSON in the data directory.
//! Everything here is safe to read without any key material loaded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VaultError};

/// Per-provider rotation defaults, in plain serializable units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationConfigEntry {
    /// Whether automatic rotation runs for this provider
    pub enabled: bool,
    /// How long before expiry a token counts as near-expiry, in seconds
    pub expiry_threshold_secs: u64,
    /// Scheduler check interval, in seconds
    pub check_interval_secs: u64,
}

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Config file version
    pub version: u32,
    /// Database file name inside the data directory
    pub database_file: String,
    /// Keyring service name the master key is protected under
    pub keyring_service: String,
    /// Keyring entry name for the master key
    pub keyring_entry: String,
    /// Maximum entries in the manager's read cache
    pub cache_capacity: usize,
    /// Whether the file audit sink is active
    pub audit_log_enabled: bool,
    /// Audit log file name inside the data directory
    pub audit_log_file: String,
    /// Per-provider rotation defaults
    pub rotation: HashMap<String, RotationConfigEntry>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let mut rotation = HashMap::new();
        rotation.insert(
            "gmail".to_string(),
            RotationConfigEntry {
                enabled: true,
                expiry_threshold_secs: 300, // 5 minutes ahead of actual expiry
                check_interval_secs: 60,
            },
        );
        rotation.insert(
            "openai".to_string(),
            RotationConfigEntry {
                enabled: false,
                expiry_threshold_secs: 300,
                check_interval_secs: 60,
            },
        );

        Self {
            version: 1,
            database_file: "credentials.db".to_string(),
            keyring_service: "mailpilot-vault".to_string(),
            keyring_entry: "master-key".to_string(),
            cache_capacity: 64,
            audit_log_enabled: true,
            audit_log_file: "audit.jsonl".to_string(),
            rotation,
        }
    }
}

impl VaultConfig {
    /// The platform data directory for the vault
    pub fn default_data_dir() -> Result<PathBuf> {
        ProjectDirs::from("com", "relay-works", "mailpilot")
            .map(|dirs| dirs.data_dir().join("vault"))
            .ok_or_else(|| {
                VaultError::ConfigurationError("could not determine data directory".to_string())
            })
    }
}

/// Loads and persists the vault configuration file
pub struct ConfigManager {
    config_file: PathBuf,
    config: VaultConfig,
}

impl ConfigManager {
    /// Load the config from `<data_dir>/config.json`, or start from defaults.
    pub fn new(data_dir: &Path) -> Self {
        let config_file = data_dir.join("config.json");
        let config = Self::load_from_file(&config_file).unwrap_or_default();

        Self {
            config_file,
            config,
        }
    }

    fn load_from_file(path: &Path) -> Result<VaultConfig> {
        if !path.exists() {
            debug!("No config file found, using defaults");
            return Ok(VaultConfig::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: VaultConfig = serde_json::from_str(&contents)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Persist the current config atomically (temp file + rename).
    pub async fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.config)?;

        let temp_path = self.config_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.config_file).await?;

        debug!("Saved config to {:?}", self.config_file);
        Ok(())
    }

    /// Current configuration
    pub fn get(&self) -> &VaultConfig {
        &self.config
    }

    /// Mutable access for in-place edits before save()
    pub fn get_mut(&mut self) -> &mut VaultConfig {
        &mut self.config
    }

    /// Replace and persist
    pub async fn update(&mut self, config: VaultConfig) -> Result<()> {
        self.config = config;
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        let config = manager.get();
        assert_eq!(config.database_file, "credentials.db");
        assert_eq!(config.cache_capacity, 64);
        assert!(config.audit_log_enabled);

        let gmail = config.rotation.get("gmail").unwrap();
        assert!(gmail.enabled);
        assert_eq!(gmail.expiry_threshold_secs, 300);
        assert_eq!(gmail.check_interval_secs, 60);

        assert!(!config.rotation.get("openai").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut manager = ConfigManager::new(temp_dir.path());
            manager.get_mut().cache_capacity = 128;
            manager.get_mut().audit_log_enabled = false;
            manager.save().await.unwrap();
        }

        {
            let manager = ConfigManager::new(temp_dir.path());
            assert_eq!(manager.get().cache_capacity, 128);
            assert!(!manager.get().audit_log_enabled);
        }
    }

    #[tokio::test]
    async fn test_update_replaces_and_saves() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(temp_dir.path());

        let mut config = VaultConfig::default();
        config.keyring_service = "test-service".to_string();
        manager.update(config).await.unwrap();

        let reloaded = ConfigManager::new(temp_dir.path());
        assert_eq!(reloaded.get().keyring_service, "test-service");
    }
}
