//! SQLite-backed state store.
//!
//! Runtime defaults follow the usual single-writer setup:
//! - `journal_mode = WAL` so `tardy show` can read while a run commits
//! - `busy_timeout = 5s` to ride out short lock contention
//!
//! Each `(namespace, key)` is one row whose payload is a JSON array of strings.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params, types::Type};

use super::{StateStore, StateWrite};
use crate::error::StoreError;

/// Busy timeout used for state DB connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATION_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS state_entries (
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    payload    TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (namespace, key)
);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL)];

const UPSERT_SQL: &str = "
INSERT INTO state_entries (namespace, key, payload) VALUES (?1, ?2, ?3)
ON CONFLICT (namespace, key) DO UPDATE SET
    payload = excluded.payload,
    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
";

/// [`StateStore`] persisted in a SQLite database file.
#[derive(Debug)]
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the state database, apply pragmas and migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, configured or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut conn = Connection::open(path)?;
        configure_connection(&conn)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate or migrate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Every key written under `namespace`, sorted.
    ///
    /// # Errors
    ///
    /// Backend read failures.
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT key FROM state_entries WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if the query fails or the stored version is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

impl StateStore for SqliteStateStore {
    fn values(&self, namespace: &str, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        let payload: Option<String> = self
            .lock()?
            .query_row(
                "SELECT payload FROM state_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|raw| {
                serde_json::from_str::<Vec<String>>(&raw).map_err(|source| StoreError::Payload {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    fn replace_values(
        &self,
        namespace: &str,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        let payload = encode_payload(namespace, key, values)?;
        self.lock()?
            .execute(UPSERT_SQL, params![namespace, key, payload])?;
        Ok(())
    }

    fn replace_batch(&self, writes: &[StateWrite]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for write in writes {
                let payload = encode_payload(&write.namespace, &write.key, &write.values)?;
                stmt.execute(params![write.namespace, write.key, payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn is_initialized(&self, namespace: &str) -> Result<bool, StoreError> {
        let exists: bool = self.lock()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM state_entries WHERE namespace = ?1)",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

fn encode_payload(namespace: &str, key: &str, values: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(values).map_err(|source| StoreError::Payload {
        namespace: namespace.to_string(),
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("state").join("tardy.sqlite3");
        (dir, path)
    }

    #[test]
    fn open_sets_wal_and_latest_schema() {
        let (_dir, path) = temp_db_path();
        let store = SqliteStateStore::open(&path).expect("open state db");
        let conn = store.lock().expect("lock");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
        assert_eq!(
            current_schema_version(&conn).expect("version"),
            LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().expect("open");
        assert_eq!(migrate(&mut conn).expect("first"), LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn).expect("second"), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn replace_overwrites_and_survives_reopen() {
        let (_dir, path) = temp_db_path();
        {
            let store = SqliteStateStore::open(&path).expect("open");
            assert!(!store.is_initialized("alice/delinquency").expect("init"));
            store
                .replace_values("alice/delinquency", "delinquent", &["1".into(), "2".into()])
                .expect("write");
            store
                .replace_values("alice/delinquency", "delinquent", &["2".into()])
                .expect("overwrite");
        }

        let store = SqliteStateStore::open(&path).expect("reopen");
        assert!(store.is_initialized("alice/delinquency").expect("init"));
        assert_eq!(
            store.values("alice/delinquency", "delinquent").expect("read"),
            Some(vec!["2".to_string()])
        );
        assert_eq!(store.values("alice/delinquency", "defaulted").expect("read"), None);
        assert_eq!(
            store.keys("alice/delinquency").expect("keys"),
            vec!["delinquent".to_string()]
        );
    }

    fn write(namespace: &str, key: &str, values: &[&str]) -> StateWrite {
        StateWrite {
            namespace: namespace.to_string(),
            key: key.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn batch_applies_every_write_in_order() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store
            .replace_batch(&[
                write("alice/delinquency", "delinquent", &["1"]),
                write("alice/delinquency", "defaulted", &["1"]),
                write("alice/delinquency", "delinquent", &["1", "2"]),
            ])
            .expect("batch");

        assert_eq!(
            store.values("alice/delinquency", "delinquent").expect("read"),
            Some(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(
            store.keys("alice/delinquency").expect("keys"),
            vec!["defaulted".to_string(), "delinquent".to_string()]
        );
    }

    #[test]
    fn failed_batch_rolls_back_earlier_writes() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store
            .replace_values("alice/delinquency", "delinquent", &["1".into()])
            .expect("seed");
        store
            .lock()
            .expect("lock")
            .execute_batch(
                "CREATE TRIGGER reject_hopeless BEFORE INSERT ON state_entries
                 WHEN NEW.key = 'delinquent90plus'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .expect("create trigger");

        let err = store
            .replace_batch(&[
                write("alice/delinquency", "delinquent", &["1", "2"]),
                write("alice/delinquency", "delinquent10plus", &["2"]),
                write("alice/delinquency", "delinquent30plus", &["2"]),
                write("alice/delinquency", "delinquent90plus", &["2"]),
            ])
            .expect_err("fourth write fails");
        assert!(matches!(err, StoreError::Sqlite(_)));

        assert_eq!(
            store.values("alice/delinquency", "delinquent").expect("read"),
            Some(vec!["1".to_string()])
        );
        assert_eq!(
            store.keys("alice/delinquency").expect("keys"),
            vec!["delinquent".to_string()]
        );
    }

    #[test]
    fn garbage_payload_is_reported_as_corrupt_state() {
        let store = SqliteStateStore::open_in_memory().expect("open");
        store
            .lock()
            .expect("lock")
            .execute(
                "INSERT INTO state_entries (namespace, key, payload) VALUES ('n', 'k', 'not json')",
                [],
            )
            .expect("insert garbage");

        let err = store.values("n", "k").expect_err("corrupt payload");
        assert_eq!(err.code(), crate::error::ErrorCode::CorruptState);
    }
}
