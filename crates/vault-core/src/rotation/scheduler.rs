//! Token rotation scheduler
//!
//! A background timer task that checks stored credentials against their
//! expiry thresholds and drives provider refresh flows. All storage
//! access goes through the secure storage manager; the scheduler's only
//! owned mutable state is its statistics and settings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{
    validate_provider, ProviderRotationStats, RotationEvent, RotationOutcome, RotationSettings,
    RotationStatistics, TokenRefresher, PROVIDER_GMAIL, PROVIDER_OPENAI,
};
use crate::error::{Result, VaultError};
use crate::manager::{GmailTokenType, SecureStorageManager};

/// Consecutive failed passes before the scheduler stops itself
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Backoff cap, as a multiple of the check interval
const MAX_BACKOFF_MULTIPLIER: u32 = 8;

/// Hard bound on a single rotation pass
const PASS_TIMEOUT: Duration = Duration::from_secs(30);

/// Event channel depth; lagging subscribers miss events rather than
/// blocking the scheduler
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Background rotation service over the secure storage manager
pub struct TokenRotationScheduler {
    manager: Arc<SecureStorageManager>,
    refresher: Arc<dyn TokenRefresher>,
    settings: RwLock<HashMap<String, RotationSettings>>,
    total_rotations: AtomicU64,
    total_failures: AtomicU64,
    provider_stats: RwLock<HashMap<String, ProviderRotationStats>>,
    events: broadcast::Sender<RotationEvent>,
    running: RwLock<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    next_check_at: RwLock<Option<DateTime<Utc>>>,
}

impl TokenRotationScheduler {
    /// Create a scheduler with default per-provider settings
    /// (gmail enabled, openai disabled - API keys do not expire).
    pub fn new(manager: Arc<SecureStorageManager>, refresher: Arc<dyn TokenRefresher>) -> Self {
        let mut settings = HashMap::new();
        settings.insert(PROVIDER_GMAIL.to_string(), RotationSettings::default());
        settings.insert(
            PROVIDER_OPENAI.to_string(),
            RotationSettings {
                enabled: false,
                ..RotationSettings::default()
            },
        );
        Self::with_settings(manager, refresher, settings)
    }

    /// Create with explicit per-provider settings (config-driven path).
    pub fn with_settings(
        manager: Arc<SecureStorageManager>,
        refresher: Arc<dyn TokenRefresher>,
        settings: HashMap<String, RotationSettings>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            manager,
            refresher,
            settings: RwLock::new(settings),
            total_rotations: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            provider_stats: RwLock::new(HashMap::new()),
            events,
            running: RwLock::new(false),
            task: Mutex::new(None),
            next_check_at: RwLock::new(None),
        }
    }

    /// Subscribe to rotation events.
    ///
    /// The channel drops events for lagging receivers; subscriber
    /// failures never reach the scheduler.
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.events.subscribe()
    }

    /// Whether the background task is active
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start the background rotation task.
    ///
    /// Idempotent while running. The first pass runs immediately;
    /// subsequent passes follow the configured check interval, with
    /// exponential backoff after failures. After
    /// `MAX_CONSECUTIVE_FAILURES` failed passes the scheduler stops
    /// itself.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                debug!("Rotation scheduler already running");
                return Ok(());
            }
            *running = true;
        }

        let this = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            this.run_loop().await;
        });

        *self.task.lock().await = Some(handle);
        info!("Rotation scheduler started");
        Ok(())
    }

    /// Stop the scheduler.
    ///
    /// The timer task is cancelled; an in-flight rotation attempt is
    /// allowed to complete, but no new passes are scheduled.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }

        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        *self.next_check_at.write().await = None;

        info!("Rotation scheduler stopped");
    }

    async fn run_loop(self: Arc<Self>) {
        let mut consecutive_failures: u32 = 0;

        loop {
            if !*self.running.read().await {
                break;
            }

            let pass = tokio::time::timeout(PASS_TIMEOUT, self.rotation_pass()).await;
            match pass {
                Ok(Ok(())) => consecutive_failures = 0,
                Ok(Err(e)) => {
                    consecutive_failures += 1;
                    warn!(
                        error = %e,
                        consecutive = consecutive_failures,
                        "Rotation pass failed"
                    );
                }
                Err(_) => {
                    consecutive_failures += 1;
                    self.total_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        consecutive = consecutive_failures,
                        "Rotation pass timed out"
                    );
                }
            }

            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!("Rotation scheduler stopping after repeated failures");
                *self.running.write().await = false;
                *self.next_check_at.write().await = None;
                break;
            }

            let base = self.shortest_enabled_interval().await;
            let multiplier = 2u32
                .saturating_pow(consecutive_failures)
                .min(MAX_BACKOFF_MULTIPLIER);
            let delay = base * multiplier;

            *self.next_check_at.write().await = Some(
                Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
            );

            tokio::time::sleep(delay).await;
        }
    }

    async fn shortest_enabled_interval(&self) -> Duration {
        self.settings
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.check_interval)
            .min()
            .unwrap_or(Duration::from_secs(60))
    }

    /// One pass over all enabled providers.
    async fn rotation_pass(&self) -> Result<()> {
        let providers: Vec<String> = {
            let settings = self.settings.read().await;
            settings
                .iter()
                .filter(|(_, s)| s.enabled)
                .map(|(name, _)| name.clone())
                .collect()
        };

        let mut first_error = None;
        for provider in providers {
            match self.is_token_near_expiry(&provider).await {
                Ok(true) => {
                    if let Err(e) = self.rotate_tokens(&provider).await {
                        // Stats and the failure event were already recorded
                        first_error.get_or_insert(e);
                    }
                }
                Ok(false) => {
                    debug!(provider = %provider, "No rotation needed");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Rotate a provider's tokens now.
    ///
    /// Every call is a real attempt - concurrent manual calls are not
    /// deduplicated, and each increments statistics exactly once.
    pub async fn rotate_tokens(&self, provider: &str) -> Result<RotationOutcome> {
        validate_provider(provider)?;

        match provider {
            PROVIDER_GMAIL => self.rotate_gmail().await,
            PROVIDER_OPENAI => {
                // API keys do not expire; always a successful no-op
                let outcome = RotationOutcome::skipped(
                    provider,
                    "OpenAI API keys don't require automatic rotation",
                );
                self.publish(RotationEvent::TokenRotated {
                    provider: provider.to_string(),
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            _ => Err(VaultError::Unsupported(provider.to_string())),
        }
    }

    async fn rotate_gmail(&self) -> Result<RotationOutcome> {
        let access_key = GmailTokenType::Access.logical_key();

        let exists = match self.manager.credential_exists(&access_key).await {
            Ok(exists) => exists,
            Err(e) => {
                self.record_failure(PROVIDER_GMAIL, &e.to_string()).await;
                return Err(e);
            }
        };

        if !exists {
            let outcome =
                RotationOutcome::skipped(PROVIDER_GMAIL, "gmail access token not near expiry");
            self.publish(RotationEvent::TokenRotated {
                provider: PROVIDER_GMAIL.to_string(),
                outcome: outcome.clone(),
            });
            return Ok(outcome);
        }

        let result = self.refresh_and_store_gmail().await;

        match result {
            Ok(outcome) => {
                self.record_success(PROVIDER_GMAIL).await;
                self.publish(RotationEvent::TokenRotated {
                    provider: PROVIDER_GMAIL.to_string(),
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(PROVIDER_GMAIL, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn refresh_and_store_gmail(&self) -> Result<RotationOutcome> {
        let refresh_token = self
            .manager
            .retrieve_gmail_token(GmailTokenType::Refresh)
            .await
            .map_err(|e| match e {
                VaultError::NotFound(_) => VaultError::ConfigurationError(
                    "gmail refresh token is missing; re-authorization required".to_string(),
                ),
                other => other,
            })?;

        let tokens = self.refresher.refresh(PROVIDER_GMAIL, &refresh_token).await?;

        self.manager
            .store_gmail_token_with_expiry(
                GmailTokenType::Access,
                &tokens.access_token,
                tokens.expires_at,
            )
            .await?;

        if let Some(new_refresh) = &tokens.refresh_token {
            self.manager
                .store_gmail_token(GmailTokenType::Refresh, new_refresh)
                .await?;
        }

        info!(provider = PROVIDER_GMAIL, "Rotated access token");
        Ok(RotationOutcome::rotated(
            PROVIDER_GMAIL,
            "access token refreshed",
        ))
    }

    /// Pure predicate: would a rotation pass act on this provider now?
    pub async fn is_token_near_expiry(&self, provider: &str) -> Result<bool> {
        validate_provider(provider)?;

        match provider {
            // API keys do not expire
            PROVIDER_OPENAI => Ok(false),
            PROVIDER_GMAIL => {
                let access_key = GmailTokenType::Access.logical_key();
                if !self.manager.credential_exists(&access_key).await? {
                    return Ok(false);
                }

                match self.manager.credential_expiry(&access_key).await? {
                    // No expiry metadata recorded: treat as due
                    None => Ok(true),
                    Some(expires_at) => {
                        let threshold = {
                            let settings = self.settings.read().await;
                            settings
                                .get(PROVIDER_GMAIL)
                                .map(|s| s.expiry_threshold)
                                .unwrap_or(RotationSettings::default().expiry_threshold)
                        };
                        let cutoff = Utc::now()
                            + chrono::Duration::from_std(threshold)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        Ok(expires_at <= cutoff)
                    }
                }
            }
            _ => Err(VaultError::Unsupported(provider.to_string())),
        }
    }

    /// Update a provider's rotation policy; independent of running state.
    pub async fn configure_provider_rotation(
        &self,
        provider: &str,
        settings: RotationSettings,
    ) -> Result<()> {
        validate_provider(provider)?;
        self.settings
            .write()
            .await
            .insert(provider.to_string(), settings);
        debug!(provider = %provider, "Updated rotation settings");
        Ok(())
    }

    /// Snapshot of rotation counters.
    pub async fn rotation_statistics(&self) -> RotationStatistics {
        let settings = self.settings.read().await;
        let stats = self.provider_stats.read().await;

        let mut providers = HashMap::new();
        for (name, provider_settings) in settings.iter() {
            let mut entry = stats.get(name).cloned().unwrap_or_default();
            entry.rotation_enabled = provider_settings.enabled;
            providers.insert(name.clone(), entry);
        }

        RotationStatistics {
            total_rotations: self.total_rotations.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            providers,
        }
    }

    /// When the next scheduled pass will run; `None` without an active
    /// schedule for the provider.
    pub async fn next_rotation_time(&self, provider: &str) -> Result<Option<DateTime<Utc>>> {
        validate_provider(provider)?;

        if !*self.running.read().await {
            return Ok(None);
        }

        let enabled = self
            .settings
            .read()
            .await
            .get(provider)
            .map(|s| s.enabled)
            .unwrap_or(false);
        if !enabled {
            return Ok(None);
        }

        Ok(*self.next_check_at.read().await)
    }

    async fn record_success(&self, provider: &str) {
        self.total_rotations.fetch_add(1, Ordering::SeqCst);
        // The lock covers only the counter update, never the refresh call
        let mut stats = self.provider_stats.write().await;
        let entry = stats.entry(provider.to_string()).or_default();
        entry.successful_rotations += 1;
        entry.last_rotation_at = Some(Utc::now());
    }

    async fn record_failure(&self, provider: &str, error: &str) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
        {
            let mut stats = self.provider_stats.write().await;
            let entry = stats.entry(provider.to_string()).or_default();
            entry.failed_rotations += 1;
        }
        self.publish(RotationEvent::TokenRotationFailed {
            provider: provider.to_string(),
            error: error.to_string(),
        });
    }

    fn publish(&self, event: RotationEvent) {
        // No receivers is fine; send never blocks
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::crypto::CredentialEncryptionEngine;
    use crate::platform::PlatformKeyStore;
    use crate::rotation::types::RefreshedTokens;
    use crate::store::CredentialStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct MockRefresher {
        calls: AtomicU64,
        fail: AtomicBool,
    }

    impl MockRefresher {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail: AtomicBool::new(false),
            }
        }

        fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for MockRefresher {
        async fn refresh(&self, _provider: &str, refresh_token: &str) -> Result<RefreshedTokens> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(VaultError::ConfigurationError(
                    "refresh endpoint returned 503".to_string(),
                ));
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(!refresh_token.is_empty());
            Ok(RefreshedTokens {
                access_token: format!("refreshed-access-{}", call),
                refresh_token: Some("refreshed-refresh".to_string()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            })
        }
    }

    async fn test_manager() -> Arc<SecureStorageManager> {
        let key_store = PlatformKeyStore::unavailable("vault-core-test", "master-key");
        let engine = Arc::new(CredentialEncryptionEngine::new(key_store));
        let store = Arc::new(CredentialStore::in_memory().unwrap());
        let manager = Arc::new(SecureStorageManager::new(
            engine,
            store,
            Arc::new(NullAuditSink),
            64,
        ));
        manager.initialize().await.unwrap();
        manager
    }

    async fn test_scheduler() -> (Arc<TokenRotationScheduler>, Arc<SecureStorageManager>, Arc<MockRefresher>) {
        let manager = test_manager().await;
        let refresher = Arc::new(MockRefresher::new());
        let refresher_dyn: Arc<dyn TokenRefresher> = refresher.clone();
        let scheduler = Arc::new(TokenRotationScheduler::new(
            Arc::clone(&manager),
            refresher_dyn,
        ));
        (scheduler, manager, refresher)
    }

    async fn seed_gmail_tokens(manager: &SecureStorageManager) {
        manager
            .store_gmail_token(GmailTokenType::Access, "initial-access")
            .await
            .unwrap();
        manager
            .store_gmail_token(GmailTokenType::Refresh, "initial-refresh")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rotate_gmail_with_stored_token() {
        let (scheduler, manager, refresher) = test_scheduler().await;
        seed_gmail_tokens(&manager).await;

        let outcome = scheduler.rotate_tokens("gmail").await.unwrap();

        assert!(outcome.was_rotated);
        assert_eq!(outcome.provider, "gmail");
        assert_eq!(refresher.call_count(), 1);

        // The refreshed tokens were re-stored through the manager
        assert_eq!(
            manager
                .retrieve_gmail_token(GmailTokenType::Access)
                .await
                .unwrap(),
            "refreshed-access-1"
        );
        assert_eq!(
            manager
                .retrieve_gmail_token(GmailTokenType::Refresh)
                .await
                .unwrap(),
            "refreshed-refresh"
        );
    }

    #[tokio::test]
    async fn test_rotate_gmail_without_token_is_noop() {
        let (scheduler, _manager, refresher) = test_scheduler().await;

        let outcome = scheduler.rotate_tokens("gmail").await.unwrap();

        assert!(!outcome.was_rotated);
        assert!(outcome.reason.contains("not near expiry"));
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rotate_openai_is_always_noop() {
        let (scheduler, manager, _) = test_scheduler().await;
        manager.store_openai_key("sk-test").await.unwrap();

        let outcome = scheduler.rotate_tokens("openai").await.unwrap();

        assert!(!outcome.was_rotated);
        assert!(outcome.reason.contains("don't require automatic rotation"));
    }

    #[tokio::test]
    async fn test_rotate_unknown_provider_fails() {
        let (scheduler, _, _) = test_scheduler().await;

        let err = scheduler.rotate_tokens("dropbox").await.unwrap_err();
        assert!(err.to_string().contains("Unsupported provider"));

        assert!(matches!(
            scheduler.rotate_tokens("").await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_statistics_integrity() {
        let (scheduler, manager, _) = test_scheduler().await;
        seed_gmail_tokens(&manager).await;

        for _ in 0..5 {
            scheduler.rotate_tokens("gmail").await.unwrap();
        }

        let stats = scheduler.rotation_statistics().await;
        assert_eq!(stats.total_rotations, 5);
        assert_eq!(stats.total_failures, 0);

        let gmail = stats.providers.get("gmail").unwrap();
        assert_eq!(gmail.successful_rotations, 5);
        assert_eq!(gmail.failed_rotations, 0);
        assert!(gmail.rotation_enabled);
        assert!(gmail.last_rotation_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_rotations_count_exactly_once_each() {
        let (scheduler, manager, _) = test_scheduler().await;
        seed_gmail_tokens(&manager).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move {
                scheduler.rotate_tokens("gmail").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = scheduler.rotation_statistics().await;
        assert_eq!(stats.total_rotations, 10);
        assert_eq!(stats.providers.get("gmail").unwrap().successful_rotations, 10);
    }

    #[tokio::test]
    async fn test_refresh_failure_recorded_and_published() {
        let (scheduler, manager, refresher) = test_scheduler().await;
        seed_gmail_tokens(&manager).await;
        refresher.fail.store(true, Ordering::SeqCst);

        let mut events = scheduler.subscribe();

        let result = scheduler.rotate_tokens("gmail").await;
        assert!(result.is_err());

        let stats = scheduler.rotation_statistics().await;
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.providers.get("gmail").unwrap().failed_rotations, 1);

        match events.recv().await.unwrap() {
            RotationEvent::TokenRotationFailed { provider, error } => {
                assert_eq!(provider, "gmail");
                assert!(error.contains("503"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rotation_event_published_on_success_and_noop() {
        let (scheduler, manager, _) = test_scheduler().await;
        let mut events = scheduler.subscribe();

        // No-op pass still publishes
        scheduler.rotate_tokens("gmail").await.unwrap();
        match events.recv().await.unwrap() {
            RotationEvent::TokenRotated { provider, outcome } => {
                assert_eq!(provider, "gmail");
                assert!(!outcome.was_rotated);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        seed_gmail_tokens(&manager).await;
        scheduler.rotate_tokens("gmail").await.unwrap();
        match events.recv().await.unwrap() {
            RotationEvent::TokenRotated { outcome, .. } => assert!(outcome.was_rotated),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_near_expiry_predicate() {
        let (scheduler, manager, _) = test_scheduler().await;

        // No token stored
        assert!(!scheduler.is_token_near_expiry("gmail").await.unwrap());

        // Token without expiry metadata counts as due
        manager
            .store_gmail_token(GmailTokenType::Access, "tok")
            .await
            .unwrap();
        assert!(scheduler.is_token_near_expiry("gmail").await.unwrap());

        // Far-future expiry is not near
        manager
            .store_gmail_token_with_expiry(
                GmailTokenType::Access,
                "tok",
                Some(Utc::now() + chrono::Duration::hours(2)),
            )
            .await
            .unwrap();
        assert!(!scheduler.is_token_near_expiry("gmail").await.unwrap());

        // Inside the 5-minute threshold
        manager
            .store_gmail_token_with_expiry(
                GmailTokenType::Access,
                "tok",
                Some(Utc::now() + chrono::Duration::seconds(60)),
            )
            .await
            .unwrap();
        assert!(scheduler.is_token_near_expiry("gmail").await.unwrap());

        // OpenAI keys never expire
        assert!(!scheduler.is_token_near_expiry("openai").await.unwrap());

        assert!(scheduler.is_token_near_expiry("dropbox").await.is_err());
    }

    #[tokio::test]
    async fn test_predicate_has_no_side_effects() {
        let (scheduler, manager, refresher) = test_scheduler().await;
        seed_gmail_tokens(&manager).await;

        scheduler.is_token_near_expiry("gmail").await.unwrap();

        assert_eq!(refresher.call_count(), 0);
        let stats = scheduler.rotation_statistics().await;
        assert_eq!(stats.total_rotations, 0);
    }

    #[tokio::test]
    async fn test_configure_provider_rotation() {
        let (scheduler, _, _) = test_scheduler().await;

        scheduler
            .configure_provider_rotation(
                "gmail",
                RotationSettings {
                    enabled: false,
                    expiry_threshold: Duration::from_secs(120),
                    check_interval: Duration::from_secs(10),
                },
            )
            .await
            .unwrap();

        let stats = scheduler.rotation_statistics().await;
        assert!(!stats.providers.get("gmail").unwrap().rotation_enabled);

        assert!(scheduler
            .configure_provider_rotation("dropbox", RotationSettings::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_scheduler_runs_immediate_pass() {
        let (scheduler, manager, refresher) = test_scheduler().await;
        seed_gmail_tokens(&manager).await;

        scheduler.clone().start().await.unwrap();
        assert!(scheduler.is_running().await);

        // The first pass runs immediately; the stored token has no expiry
        // metadata, so it counts as due and gets rotated.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(refresher.call_count() >= 1);
        let stats = scheduler.rotation_statistics().await;
        assert!(stats.total_rotations >= 1);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (scheduler, _, _) = test_scheduler().await;

        scheduler.clone().start().await.unwrap();
        scheduler.clone().start().await.unwrap();
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_next_rotation_time() {
        let (scheduler, _, _) = test_scheduler().await;

        // Stopped: no schedule for anyone
        assert!(scheduler.next_rotation_time("gmail").await.unwrap().is_none());

        scheduler.clone().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Running with rotation enabled: a next pass is scheduled
        assert!(scheduler.next_rotation_time("gmail").await.unwrap().is_some());
        // Disabled provider has no active schedule
        assert!(scheduler
            .next_rotation_time("openai")
            .await
            .unwrap()
            .is_none());

        assert!(scheduler.next_rotation_time("dropbox").await.is_err());

        scheduler.stop().await;
        assert!(scheduler.next_rotation_time("gmail").await.unwrap().is_none());
    }
}
