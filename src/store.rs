//! Durable key-value store backing all agent state.
//!
//! A single SQLite table maps string keys to JSON values. Everything the
//! agent must survive a restart with lives here: the record queue, policy
//! config, usage timer, collector markers, and sync bookkeeping. The
//! connection sits behind a mutex so all reads and writes to a given key
//! are serialized (single-writer discipline).

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Store errors.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite failure.
    Database(String),
    /// A stored value failed to serialize or deserialize.
    Codec(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "store database error: {e}"),
            StoreError::Codec(e) => write!(f, "store codec error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable key-value store with atomic put/get/delete and prefix listing.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("create store dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; the connection
        // itself is still usable.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store a value under a key, replacing any previous value.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.put_raw(key, &json)
    }

    /// Store a pre-serialized JSON value.
    pub fn put_raw(&self, key: &str, json: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, json],
        )?;
        Ok(())
    }

    /// Fetch and deserialize a value, `None` if the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    /// Fetch the raw JSON text for a key.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Remove a set of keys in a single transaction.
    pub fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?1")?;
            for key in keys {
                stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// List all `(key, raw_json)` pairs whose key starts with `prefix`,
    /// ordered by key.
    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.lock();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn
            .prepare("SELECT key, value FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count keys under a prefix.
    pub fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let conn = self.lock();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE key LIKE ?1 ESCAPE '\\'",
            params![pattern],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Well-known store keys.
pub mod keys {
    /// Set once device registration has completed.
    pub const SETUP_COMPLETE: &str = "setup_complete";
    /// Whether the launcher icon is hidden.
    pub const STEALTH_ENABLED: &str = "stealth_enabled";
    /// Backend-assigned child identifier scoping all uploads.
    pub const CHILD_ID: &str = "child_id";
    /// Stable local device identifier, generated on first run.
    pub const DEVICE_ID: &str = "device_id";
    /// Current policy config (replaced wholesale on each successful pull).
    pub const POLICY_CONFIG: &str = "policy_config";
    /// Per-day per-app usage accumulator.
    pub const USAGE_TIMER: &str = "usage_timer";
    /// Timestamp of the last successful heartbeat.
    pub const LAST_HEARTBEAT_AT: &str = "last_heartbeat_at";
    /// High-water mark for the remote command pull.
    pub const UPDATES_SINCE: &str = "updates_since";
    /// Prefix for per-collector "last seen" markers.
    pub const MARKER_PREFIX: &str = "marker/";
    /// Prefix for queued, not-yet-acknowledged records.
    pub const QUEUE_PREFIX: &str = "queue/";
}
