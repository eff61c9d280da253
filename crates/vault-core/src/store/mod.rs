//! Credential persistence
//!
//! Embedded SQLite mapping `logical_key -> serialized EncryptedCredential`
//! with an optional expiry column. One table, upsert semantics, last
//! write wins. The store never sees plaintext; blobs arrive encrypted.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, VaultError};

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::StorageError(e.to_string())
    }
}

/// Embedded-database credential storage.
///
/// # Thread safety
/// The connection is wrapped in a `Mutex`; SQLite serializes writes, so
/// the last completed write for a logical key wins.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Open (or create) the credential database at the given path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                logical_key TEXT PRIMARY KEY,
                blob TEXT NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VaultError::StorageError("connection mutex poisoned".to_string()))
    }

    /// Upsert a credential blob under a logical key.
    pub fn set(&self, key: &str, blob: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let expires = expires_at.map(|dt| dt.to_rfc3339());

        self.lock()?.execute(
            r#"
            INSERT INTO credentials (logical_key, blob, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(logical_key) DO UPDATE SET
                blob = excluded.blob,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![key, blob, expires, now],
        )?;

        debug!(key = %key, "Persisted credential blob");
        Ok(())
    }

    /// Fetch the blob for a logical key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let blob = conn
            .query_row(
                "SELECT blob FROM credentials WHERE logical_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    /// Fetch only the expiry column; outer `None` means no such row.
    pub fn get_expiry(&self, key: &str) -> Result<Option<Option<DateTime<Utc>>>> {
        let conn = self.lock()?;
        let row: Option<Option<String>> = conn
            .query_row(
                "SELECT expires_at FROM credentials WHERE logical_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(s)) => {
                let dt = DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| VaultError::StorageError(format!("bad expires_at: {}", e)))?
                    .with_timezone(&Utc);
                Ok(Some(Some(dt)))
            }
        }
    }

    /// Delete a row; returns whether one existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let affected = self.lock()?.execute(
            "DELETE FROM credentials WHERE logical_key = ?1",
            params![key],
        )?;
        Ok(affected > 0)
    }

    /// All logical keys currently persisted.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT logical_key FROM credentials ORDER BY logical_key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Probe the connection with a trivial query.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))?;
        debug!(rows = count, "Credential store health probe");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_set_and_get() {
        let store = CredentialStore::in_memory().unwrap();

        store.set("gmail_access_token", "{\"blob\":1}", None).unwrap();

        let blob = store.get("gmail_access_token").unwrap();
        assert_eq!(blob.as_deref(), Some("{\"blob\":1}"));
    }

    #[test]
    fn test_get_missing() {
        let store = CredentialStore::in_memory().unwrap();
        assert!(store.get("absent").unwrap().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let store = CredentialStore::in_memory().unwrap();

        store.set("key", "first", None).unwrap();
        store.set("key", "second", None).unwrap();

        assert_eq!(store.get("key").unwrap().as_deref(), Some("second"));
        assert_eq!(store.list_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_expiry_roundtrip() {
        let store = CredentialStore::in_memory().unwrap();
        let expires = Utc::now() + Duration::hours(1);

        store.set("token", "blob", Some(expires)).unwrap();
        store.set("no-expiry", "blob", None).unwrap();

        let stored = store.get_expiry("token").unwrap().unwrap().unwrap();
        // RFC 3339 preserves sub-second precision
        assert_eq!(stored.timestamp_millis(), expires.timestamp_millis());

        assert_eq!(store.get_expiry("no-expiry").unwrap(), Some(None));
        assert_eq!(store.get_expiry("absent").unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = CredentialStore::in_memory().unwrap();

        store.set("key", "blob", None).unwrap();
        assert!(store.remove("key").unwrap());
        assert!(!store.remove("key").unwrap());
        assert!(store.get("key").unwrap().is_none());
    }

    #[test]
    fn test_list_keys_sorted() {
        let store = CredentialStore::in_memory().unwrap();

        store.set("openai_api_key", "b", None).unwrap();
        store.set("gmail_access_token", "a", None).unwrap();
        store.set("gmail_refresh_token", "c", None).unwrap();

        let keys = store.list_keys().unwrap();
        assert_eq!(
            keys,
            vec!["gmail_access_token", "gmail_refresh_token", "openai_api_key"]
        );
    }

    #[test]
    fn test_health_check() {
        let store = CredentialStore::in_memory().unwrap();
        assert!(store.health_check().is_ok());
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials.db");

        {
            let store = CredentialStore::open(&path).unwrap();
            store.set("key", "persisted", None).unwrap();
        }
        {
            let store = CredentialStore::open(&path).unwrap();
            assert_eq!(store.get("key").unwrap().as_deref(), Some("persisted"));
        }
    }
}
