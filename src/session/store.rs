// Persistent key-value storage for the session entities

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EXPIRES_AT_KEY: &str = "expires_at";
pub const USER_KEY: &str = "user";

/// All keys owned by a session, in storage order
pub const SESSION_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY, USER_KEY];

/// String-valued key-value storage that survives restarts
///
/// Multi-key operations must be atomic with respect to each other: a reader
/// running concurrently with `set_many` sees either all old or all new values.
pub trait SessionStore: Send + Sync {
    /// Read several keys in one consistent snapshot
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>>;

    /// Write several keys at once
    fn set_many(&self, entries: &[(&str, String)]) -> Result<()>;

    /// Remove several keys at once; missing keys are ignored
    fn remove_many(&self, keys: &[&str]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_many(&[key])?.pop().flatten())
    }
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;
        Ok(keys.iter().map(|k| entries.get(*k).cloned()).collect())
    }

    fn set_many(&self, items: &[(&str, String)]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;
        for (key, value) in items {
            entries.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// SQLite-backed store using a single `auth_kv` table
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the table exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Database that lives only as long as the store
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }
}

impl SessionStore for SqliteStore {
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin read transaction")?;

        let mut values = Vec::with_capacity(keys.len());
        {
            let mut stmt = tx
                .prepare_cached("SELECT value FROM auth_kv WHERE key = ?")
                .context("Failed to prepare session query")?;
            for key in keys {
                let value = match stmt.query_row([key], |row| row.get::<_, String>(0)) {
                    Ok(v) => Some(v),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to read key: {}", key))
                    }
                };
                values.push(value);
            }
        }

        tx.commit().context("Failed to finish read transaction")?;
        Ok(values)
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin write transaction")?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )
            .with_context(|| format!("Failed to write key: {}", key))?;
        }
        tx.commit().context("Failed to commit session write")
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin delete transaction")?;
        for key in keys {
            tx.execute("DELETE FROM auth_kv WHERE key = ?", [key])
                .with_context(|| format!("Failed to delete key: {}", key))?;
        }
        tx.commit().context("Failed to commit session delete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn SessionStore) {
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);

        store
            .set_many(&[
                (ACCESS_TOKEN_KEY, "A1".to_string()),
                (REFRESH_TOKEN_KEY, "R1".to_string()),
            ])
            .unwrap();
        assert_eq!(
            store.get_many(&SESSION_KEYS).unwrap(),
            vec![Some("A1".to_string()), Some("R1".to_string()), None, None]
        );

        store
            .set_many(&[(ACCESS_TOKEN_KEY, "A2".to_string())])
            .unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), Some("A2".to_string()));

        store.remove_many(&SESSION_KEYS).unwrap();
        assert_eq!(store.get_many(&SESSION_KEYS).unwrap(), vec![None; 4]);

        // Removing again is harmless
        store.remove_many(&SESSION_KEYS).unwrap();
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "dealer-session-test-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = dir.join("session.sqlite3");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set_many(&[(EXPIRES_AT_KEY, "1700000000".to_string())])
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(EXPIRES_AT_KEY).unwrap(),
            Some("1700000000".to_string())
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
