//! Rotation settings, statistics, outcomes, and the refresh boundary

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::RotationConfigEntry;
use crate::error::{Result, VaultError};

/// Provider name for Gmail OAuth tokens
pub const PROVIDER_GMAIL: &str = "gmail";

/// Provider name for the OpenAI API key
pub const PROVIDER_OPENAI: &str = "openai";

/// Providers the scheduler knows how to rotate
pub const SUPPORTED_PROVIDERS: &[&str] = &[PROVIDER_GMAIL, PROVIDER_OPENAI];

/// Reject empty and unknown provider names
pub fn validate_provider(provider: &str) -> Result<()> {
    if provider.trim().is_empty() {
        return Err(VaultError::InvalidInput(
            "provider name must not be empty".to_string(),
        ));
    }
    if !SUPPORTED_PROVIDERS.contains(&provider) {
        return Err(VaultError::Unsupported(provider.to_string()));
    }
    Ok(())
}

/// Per-provider rotation policy
#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Whether the scheduler rotates this provider automatically
    pub enabled: bool,
    /// How far ahead of actual expiry a token counts as near-expiry
    pub expiry_threshold: Duration,
    /// Scheduler check interval
    pub check_interval: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            // Conservative buffer ahead of actual token expiry
            expiry_threshold: Duration::from_secs(300),
            check_interval: Duration::from_secs(60),
        }
    }
}

impl From<&RotationConfigEntry> for RotationSettings {
    fn from(entry: &RotationConfigEntry) -> Self {
        Self {
            enabled: entry.enabled,
            expiry_threshold: Duration::from_secs(entry.expiry_threshold_secs),
            check_interval: Duration::from_secs(entry.check_interval_secs),
        }
    }
}

/// Result of one rotation attempt
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub provider: String,
    pub was_rotated: bool,
    pub reason: String,
    pub rotated_at: DateTime<Utc>,
}

impl RotationOutcome {
    pub fn rotated(provider: &str, reason: &str) -> Self {
        Self {
            provider: provider.to_string(),
            was_rotated: true,
            reason: reason.to_string(),
            rotated_at: Utc::now(),
        }
    }

    pub fn skipped(provider: &str, reason: &str) -> Self {
        Self {
            provider: provider.to_string(),
            was_rotated: false,
            reason: reason.to_string(),
            rotated_at: Utc::now(),
        }
    }
}

/// Per-provider rotation counters
#[derive(Debug, Clone, Default)]
pub struct ProviderRotationStats {
    pub successful_rotations: u64,
    pub failed_rotations: u64,
    pub rotation_enabled: bool,
    pub last_rotation_at: Option<DateTime<Utc>>,
}

/// Snapshot of scheduler statistics.
///
/// Counters only ever increase; they reset on process restart.
#[derive(Debug, Clone, Default)]
pub struct RotationStatistics {
    pub total_rotations: u64,
    pub total_failures: u64,
    pub providers: HashMap<String, ProviderRotationStats>,
}

/// Events the scheduler publishes; subscribers never block it
#[derive(Debug, Clone)]
pub enum RotationEvent {
    TokenRotated {
        provider: String,
        outcome: RotationOutcome,
    },
    TokenRotationFailed {
        provider: String,
        error: String,
    },
}

/// Tokens handed back by the provider's refresh flow
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Provider refresh boundary.
///
/// Implemented by the application's OAuth client, outside this crate;
/// the scheduler only drives it.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, provider: &str, refresh_token: &str) -> Result<RefreshedTokens>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_provider() {
        assert!(validate_provider(PROVIDER_GMAIL).is_ok());
        assert!(validate_provider(PROVIDER_OPENAI).is_ok());

        assert!(matches!(
            validate_provider(""),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_provider("dropbox"),
            Err(VaultError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unsupported_error_message() {
        let err = validate_provider("dropbox").unwrap_err();
        assert!(err.to_string().contains("Unsupported provider"));
    }

    #[test]
    fn test_default_settings() {
        let settings = RotationSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.expiry_threshold, Duration::from_secs(300));
        assert_eq!(settings.check_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_from_config_entry() {
        let entry = RotationConfigEntry {
            enabled: false,
            expiry_threshold_secs: 120,
            check_interval_secs: 30,
        };
        let settings = RotationSettings::from(&entry);
        assert!(!settings.enabled);
        assert_eq!(settings.expiry_threshold, Duration::from_secs(120));
        assert_eq!(settings.check_interval, Duration::from_secs(30));
    }
}
