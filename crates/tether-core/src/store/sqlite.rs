//! SQLite-backed persistent store

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::{migrations, PersistentStore, RecordKey};
use crate::error::{Error, Result};

/// `PersistentStore` keeping each record as one row of a `records` table.
///
/// Every save is a single upsert statement, so SQLite's journal guarantees a
/// record is either fully replaced or untouched after a crash.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open a store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. A file that is not a valid database is
    /// moved aside and a fresh store is created in its place.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match Self::open_at(&path) {
            Ok(store) => Ok(store),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Store at {} is unreadable ({}); quarantining and starting fresh",
                    path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&path)?;
                Self::open_at(&path)
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|error| Error::storage("lock sqlite connection", error))
    }

    /// Configure `SQLite` for durable small writes
    fn configure(&self) -> Result<()> {
        let conn = self.connection()?;
        // WAL is unavailable for in-memory databases
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        migrations::run(&conn)
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    /// Rename the broken file to `<name>.corrupt-<ts>` and drop WAL/SHM sidecars.
    fn quarantine_corrupted_db_files(path: &Path) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "tether.db".to_string());

        if path.exists() {
            let backup = path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
            std::fs::rename(path, &backup)?;
            tracing::warn!("Moved unreadable store to {}", backup.display());
        }

        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = path.with_file_name(format!("{file_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
            }
        }
        Ok(())
    }
}

impl PersistentStore for SqliteStore {
    fn load(&self, record: RecordKey) -> Result<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![record.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, record: RecordKey, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO records (key, value, updated_at, writes) VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at,
             writes = records.writes + 1",
            params![record.as_str(), value, now],
        )
        .map_err(|error| Error::storage(&format!("write {record}"), error))?;
        Ok(())
    }

    fn remove(&self, record: RecordKey) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM records WHERE key = ?1",
            params![record.as_str()],
        )
        .map_err(|error| Error::storage(&format!("delete {record}"), error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.load(RecordKey::PendingActions).unwrap(), None);
    }

    #[test]
    fn save_replaces_previous_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(RecordKey::CacheTable, "{\"a\":1}").unwrap();
        store.save(RecordKey::CacheTable, "{\"a\":2}").unwrap();
        assert_eq!(
            store.load(RecordKey::CacheTable).unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        store.remove(RecordKey::CacheTable).unwrap();
        assert_eq!(store.load(RecordKey::CacheTable).unwrap(), None);
    }

    #[test]
    fn records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("tether.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(RecordKey::SyncMeta, "{\"last\":1}").unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.load(RecordKey::SyncMeta).unwrap().as_deref(),
            Some("{\"last\":1}")
        );
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tether.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load(RecordKey::SyncMeta).unwrap(), None);

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("tether.db.corrupt-")
            });
        assert!(quarantined);
    }
}
