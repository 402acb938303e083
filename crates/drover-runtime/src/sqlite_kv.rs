//! SQLite-backed TTL store shared by all API replicas on one host.

#![cfg(feature = "sqlite-persistence")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::kv::{KvError, TtlStore};

/// TTL store over a SQLite table. Each operation is a single guarded
/// statement, so the compare-and-swap semantics hold across connections.
#[derive(Clone)]
pub struct SqliteTtlStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTtlStore {
    pub fn new(db_path: &str) -> Result<Self, KvError> {
        let conn = Connection::open(db_path)
            .map_err(|e| KvError::Backend(format!("open sqlite ttl store: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), KvError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ttl_entries (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ttl_entries_expiry ON ttl_entries(expires_at_ms);
            "#,
        )
        .map_err(|e| KvError::Backend(format!("init ttl store schema: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, KvError> {
        self.conn
            .lock()
            .map_err(|_| KvError::Backend("ttl store lock poisoned".to_string()))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms() + ttl.as_millis().min(i64::MAX as u128) as i64
}

impl TtlStore for SqliteTtlStore {
    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT INTO ttl_entries (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, expires_at_ms = excluded.expires_at_ms
                 WHERE ttl_entries.expires_at_ms <= ?4",
                params![key, value, expiry_ms(ttl), now_ms()],
            )
            .map_err(|e| KvError::Backend(format!("ttl put_if_absent: {}", e)))?;
        Ok(changed > 0)
    }

    fn refresh_if_value(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE ttl_entries SET expires_at_ms = ?3
                 WHERE key = ?1 AND value = ?2 AND expires_at_ms > ?4",
                params![key, value, expiry_ms(ttl), now_ms()],
            )
            .map_err(|e| KvError::Backend(format!("ttl refresh: {}", e)))?;
        Ok(changed > 0)
    }

    fn remove_if_value(&self, key: &str, value: &str) -> Result<(), KvError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM ttl_entries WHERE key = ?1 AND value = ?2",
            params![key, value],
        )
        .map_err(|e| KvError::Backend(format!("ttl remove_if_value: {}", e)))?;
        Ok(())
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO ttl_entries (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
            params![key, value, expiry_ms(ttl)],
        )
        .map_err(|e| KvError::Backend(format!("ttl put: {}", e)))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM ttl_entries WHERE key = ?1 AND expires_at_ms > ?2",
            params![key, now_ms()],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| KvError::Backend(format!("ttl get: {}", e)))
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM ttl_entries WHERE key = ?1", params![key])
            .map_err(|e| KvError::Backend(format!("ttl remove: {}", e)))?;
        Ok(())
    }
}
