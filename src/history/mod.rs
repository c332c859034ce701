//! Append-only prediction history.
//!
//! Each successful prediction is recorded as `(label, confidence)`. The store
//! is write-only from the pipeline's point of view.

use crate::core::DiagnosisError;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_PREDICTIONS: &str = "CREATE TABLE IF NOT EXISTS predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    confidence REAL NOT NULL,
    recorded_at TEXT NOT NULL
)";

/// Destination for successful predictions.
pub trait HistoryStore: Send + Sync {
    /// Durably records one prediction, or fails without a partial record.
    fn append(&self, label: &str, confidence: f32) -> Result<(), DiagnosisError>;
}

/// SQLite-backed history.
///
/// Appends are serialized on a single connection and each one runs in its own
/// transaction.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistoryStore").finish_non_exhaustive()
    }
}

impl SqliteHistoryStore {
    /// Opens or creates the database at `path` and migrates it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DiagnosisError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            DiagnosisError::history_write(format!("failed to open '{}'", path.display()), e)
        })?;
        Self::from_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, DiagnosisError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DiagnosisError::history_write("failed to open in-memory database", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DiagnosisError> {
        let setup = |e: rusqlite::Error| DiagnosisError::history_write("failed to prepare schema", e);

        conn.busy_timeout(BUSY_TIMEOUT).map_err(setup)?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(setup)?;

        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(setup)?;
        if version > SCHEMA_VERSION {
            return Err(DiagnosisError::config_error_detailed(
                "history_path",
                format!(
                    "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
                ),
            ));
        }

        conn.execute(CREATE_PREDICTIONS, []).map_err(setup)?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(setup)?;
        }

        debug!(journal_mode = %journal_mode, schema_version = SCHEMA_VERSION, "history store ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, label: &str, confidence: f32) -> Result<(), DiagnosisError> {
        let mut conn = self.conn.lock().map_err(|_| {
            DiagnosisError::history_write(
                "history connection unusable",
                std::io::Error::other("connection lock poisoned"),
            )
        })?;

        let write = |e: rusqlite::Error| {
            DiagnosisError::history_write(format!("failed to record prediction '{label}'"), e)
        };

        let tx = conn.transaction().map_err(write)?;
        tx.execute(
            "INSERT INTO predictions (label, confidence, recorded_at) VALUES (?1, ?2, ?3)",
            params![label, confidence as f64, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(write)?;
        tx.commit().map_err(write)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn count_rows(path: &Path) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_append_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let store = SqliteHistoryStore::open(&path).unwrap();
        store.append("Apple - Black rot", 97.5).unwrap();

        let conn = Connection::open(&path).unwrap();
        let (label, confidence): (String, f64) = conn
            .query_row("SELECT label, confidence FROM predictions", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(label, "Apple - Black rot");
        assert!((confidence - 97.5).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_appends_are_all_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let store = Arc::new(SqliteHistoryStore::open(&path).unwrap());

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.append(&format!("label-{i}"), i as f32))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(count_rows(&path), 50);
        let conn = Connection::open(&path).unwrap();
        let distinct: i64 = conn
            .query_row("SELECT COUNT(DISTINCT label) FROM predictions", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(distinct, 50);
    }

    #[test]
    fn test_reopen_keeps_rows_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        SqliteHistoryStore::open(&path)
            .unwrap()
            .append("Tomato - healthy", 88.0)
            .unwrap();
        SqliteHistoryStore::open(&path)
            .unwrap()
            .append("Tomato - healthy", 91.0)
            .unwrap();

        assert_eq!(count_rows(&path), 2);
        let conn = Connection::open(&path).unwrap();
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }
        assert!(matches!(
            SqliteHistoryStore::open(&path),
            Err(DiagnosisError::Config { .. })
        ));
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        store.append("Grape - healthy", 50.0).unwrap();
    }
}
