//! Security audit log
//!
//! Append-only, sanitized record of credential operations. Sinks are
//! fire-and-forget: a sink that cannot write must never fail the
//! credential operation that produced the event.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Longest error message an audit record will carry
const MAX_MESSAGE_LEN: usize = 200;

/// Any unbroken run at least this long is masked; real tokens and key
/// material are longer than anything a legitimate message needs.
const MASK_RUN_LEN: usize = 40;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    VaultInitialized,
    VaultShutdown,
    CredentialStored,
    CredentialRetrieved,
    CredentialRemoved,
    CorruptionDetected,
    RotationCompleted,
    RotationFailed,
    HealthCheck,
}

/// One sanitized audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAuditEvent {
    pub id: Uuid,
    pub event_type: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityAuditEvent {
    /// A successful operation
    pub fn success(event_type: AuditEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            provider: None,
            success: true,
            error_message: None,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// A failed operation; the message is sanitized before it is kept
    pub fn failure(event_type: AuditEventType, message: &str) -> Self {
        Self {
            error_message: Some(sanitize_message(message)),
            success: false,
            ..Self::success(event_type)
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .insert(key.to_string(), sanitize_message(value));
        self
    }
}

/// Strip anything that could be key material from a message.
///
/// Long unbroken runs are masked, the rest is length-capped.
fn sanitize_message(message: &str) -> String {
    let masked: Vec<String> = message
        .split_whitespace()
        .map(|word| {
            if word.len() >= MASK_RUN_LEN {
                "[REDACTED]".to_string()
            } else {
                word.to_string()
            }
        })
        .collect();
    let mut out = masked.join(" ");
    if out.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}

/// Write sink for audit events.
///
/// Implementations must swallow their own failures.
pub trait AuditSink: Send + Sync {
    fn log_event(&self, event: &SecurityAuditEvent);
}

/// Default sink: structured tracing records
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_event(&self, event: &SecurityAuditEvent) {
        if event.success {
            info!(
                audit_id = %event.id,
                event = ?event.event_type,
                provider = event.provider.as_deref().unwrap_or("-"),
                "audit"
            );
        } else {
            warn!(
                audit_id = %event.id,
                event = ?event.event_type,
                provider = event.provider.as_deref().unwrap_or("-"),
                error = event.error_message.as_deref().unwrap_or("-"),
                "audit"
            );
        }
    }
}

/// Append-only JSON-lines file sink
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl AuditSink for FileAuditSink {
    fn log_event(&self, event: &SecurityAuditEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", line));

        if let Err(e) = result {
            // Never propagated: audit failures must not fail the operation
            warn!(path = ?self.path, error = %e, "Failed to append audit event");
        }
    }
}

/// Discards everything; used in tests
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn log_event(&self, _event: &SecurityAuditEvent) {}
}
