//! Small persisted key-value port.
//!
//! Each concern owns disjoint keys, so writes are last-writer-wins with no
//! read-modify-write between concerns.

use crate::error::StoreError;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;

pub const CHAT_ID_KEY: &str = "currentChatId";
pub const CHAT_NAME_KEY: &str = "currentChatName";
pub const RECORDS_COLLAPSED_KEY: &str = "recordsCollapsed";
pub const REFRESH_TOKEN_KEY: &str = "identityRefreshToken";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// SQLite-backed store living in the app data directory.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(app_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(app_dir)?;
        let conn = Connection::open(app_dir.join("clearchart.db"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let result = conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        });
        match result {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Read a boolean flag; anything but `"true"` is false.
pub fn get_flag(store: &dyn KeyValueStore, key: &str) -> bool {
    matches!(store.get(key), Ok(Some(v)) if v == "true")
}

pub fn set_flag(store: &dyn KeyValueStore, key: &str, value: bool) -> Result<(), StoreError> {
    store.set(key, if value { "true" } else { "false" })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get(CHAT_ID_KEY).unwrap(), None);
        store.set(CHAT_ID_KEY, "abc").unwrap();
        store.set(CHAT_ID_KEY, "def").unwrap();
        assert_eq!(store.get(CHAT_ID_KEY).unwrap().as_deref(), Some("def"));
        store.remove(CHAT_ID_KEY).unwrap();
        store.remove(CHAT_ID_KEY).unwrap();
        assert_eq!(store.get(CHAT_ID_KEY).unwrap(), None);
    }

    #[test]
    fn memory_store_last_writer_wins() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_last_writer_wins() {
        exercise(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            store.set(CHAT_NAME_KEY, "Lab results").unwrap();
        }
        let store = SqliteStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(CHAT_NAME_KEY).unwrap().as_deref(),
            Some("Lab results")
        );
    }

    #[test]
    fn flags_default_to_false() {
        let store = MemoryStore::new();
        assert!(!get_flag(&store, RECORDS_COLLAPSED_KEY));
        set_flag(&store, RECORDS_COLLAPSED_KEY, true).unwrap();
        assert!(get_flag(&store, RECORDS_COLLAPSED_KEY));
    }
}
