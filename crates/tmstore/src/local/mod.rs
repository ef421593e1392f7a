//! Local durable key-value store.
//!
//! This module provides the `SQLite`-backed flat key-value store that every
//! write lands in first and every failed remote read falls back to.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::document::Document;
use crate::error::{Error, Result};

/// Durable key-value store backed by `SQLite`.
///
/// The connection sits behind a mutex so the store can be shared across
/// tasks; every operation is a single short statement.
#[derive(Debug)]
pub struct LocalStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening local store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Local store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store, used by tests and `--memory` runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("local store connection lock poisoned"))
    }

    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM entries WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            r"
            INSERT INTO entries (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, value, now],
        )?;
        debug!("Stored local entry '{}' ({} bytes)", key, value.len());
        Ok(())
    }

    /// Delete the entry under `key`.
    ///
    /// Returns `true` if an entry was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM entries WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// List all keys in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM entries ORDER BY key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Read every entry as a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn all(&self) -> Result<Document> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM entries")?;
        let document = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Document, _>>()?;
        Ok(document)
    }

    /// Count stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<LocalStats> {
        let total_entries = self.count()?;

        let last: Option<String> = self
            .conn()?
            .query_row(
                "SELECT updated_at FROM entries ORDER BY updated_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_updated = last
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(LocalStats {
            total_entries,
            last_updated,
            db_size_bytes,
        })
    }
}

/// Statistics about the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStats {
    /// Total number of entries stored.
    pub total_entries: i64,
    /// When the most recent write happened.
    pub last_updated: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> LocalStore {
        LocalStore::open_in_memory().expect("failed to create test store")
    }

    #[test]
    fn test_open_in_memory() {
        let store = create_test_store();
        assert_eq!(store.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_set_and_get() {
        let store = create_test_store();
        store.set("missions", r#"[{"id":1}]"#).unwrap();
        assert_eq!(
            store.get("missions").unwrap().as_deref(),
            Some(r#"[{"id":1}]"#)
        );
    }

    #[test]
    fn test_get_missing() {
        let store = create_test_store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let store = create_test_store();
        store.set("users", "[]").unwrap();
        store.set("users", r#"[{"name":"ana"}]"#).unwrap();

        assert_eq!(
            store.get("users").unwrap().as_deref(),
            Some(r#"[{"name":"ana"}]"#)
        );
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let store = create_test_store();
        store.set("a", "1").unwrap();
        assert!(store.remove("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
        assert!(!store.remove("a").unwrap());
    }

    #[test]
    fn test_keys_sorted() {
        let store = create_test_store();
        store.set("b", "2").unwrap();
        store.set("a", "1").unwrap();
        store.set("c", "3").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_all() {
        let store = create_test_store();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("b").unwrap(), "2");
    }

    #[test]
    fn test_unicode_and_empty_values() {
        let store = create_test_store();
        store.set("greeting", "Olá 世界 🌍").unwrap();
        store.set("blank", "").unwrap();

        assert_eq!(store.get("greeting").unwrap().as_deref(), Some("Olá 世界 🌍"));
        assert_eq!(store.get("blank").unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_stats() {
        let store = create_test_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_entries, 0);
        assert!(stats.last_updated.is_none());

        store.set("a", "1").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert!(stats.last_updated.is_some());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_open_file_based_persists() {
        let db_path = std::env::temp_dir().join(format!(
            "tmstore_local_test_{}/nested/store.db",
            std::process::id()
        ));

        {
            let store = LocalStore::open(&db_path).unwrap();
            store.set("missions", "[]").unwrap();
            assert_eq!(store.path(), db_path);
        }

        let reopened = LocalStore::open(&db_path).unwrap();
        assert_eq!(reopened.get("missions").unwrap().as_deref(), Some("[]"));
        assert!(reopened.stats().unwrap().db_size_bytes > 0);

        drop(reopened);
        if let Some(parent) = db_path.parent().and_then(Path::parent) {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
