//! Shared TTL key-value store backing leases and cancel flags.
//!
//! Anything that must be correct across API replicas lives here rather
//! than in process memory. Every operation is an atomic read-modify-write
//! against the backing store; an expired entry behaves exactly like a
//! missing one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL store error type.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("ttl store error: {0}")]
    Backend(String),
}

/// Shared TTL key-value contract.
///
/// **Constraints (must hold in all implementations):**
/// - `put_if_absent` creates the entry only when no live entry exists and
///   reports whether *this* call created it.
/// - `refresh_if_value` extends the TTL only while the stored value still
///   matches; it returns false once the entry expired or was replaced.
/// - `remove_if_value` never deletes an entry holding a different value.
pub trait TtlStore: Send + Sync {
    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    fn refresh_if_value(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    fn remove_if_value(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Unconditional write, replacing any existing entry.
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Live value for the key, or None if absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    fn remove(&self, key: &str) -> Result<(), KvError>;
}

struct TtlEntry {
    value: String,
    expires_at: Instant,
}

impl TtlEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory TTL store for single-process deployments and tests.
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, TtlEntry>>,
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TtlEntry>>, KvError> {
        self.entries
            .lock()
            .map_err(|_| KvError::Backend("ttl store lock poisoned".to_string()))
    }
}

impl Default for InMemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlStore for InMemoryTtlStore {
    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.locked()?;
        let now = Instant::now();
        if entries.get(key).map(|e| e.is_live(now)).unwrap_or(false) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            TtlEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn refresh_if_value(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.locked()?;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == value => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_if_value(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.locked()?;
        if entries.get(key).map(|e| e.value == value).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(())
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.locked()?;
        entries.insert(
            key.to_string(),
            TtlEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.locked()?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.locked()?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_if_absent_is_first_writer_wins() {
        let store = InMemoryTtlStore::new();
        assert!(store
            .put_if_absent("k", "a", Duration::from_secs(5))
            .expect("put a"));
        assert!(!store
            .put_if_absent("k", "b", Duration::from_secs(5))
            .expect("put b"));
        assert_eq!(store.get("k").expect("get").as_deref(), Some("a"));
    }

    #[test]
    fn expired_entry_behaves_like_missing() {
        let store = InMemoryTtlStore::new();
        assert!(store
            .put_if_absent("k", "a", Duration::from_millis(20))
            .expect("put a"));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get("k").expect("get"), None);
        assert!(store
            .put_if_absent("k", "b", Duration::from_secs(5))
            .expect("put b"));
        assert_eq!(store.get("k").expect("get").as_deref(), Some("b"));
    }

    #[test]
    fn refresh_requires_matching_live_value() {
        let store = InMemoryTtlStore::new();
        store
            .put("k", "a", Duration::from_millis(20))
            .expect("put");
        assert!(store
            .refresh_if_value("k", "a", Duration::from_secs(5))
            .expect("refresh"));
        assert!(!store
            .refresh_if_value("k", "other", Duration::from_secs(5))
            .expect("refresh wrong value"));

        store
            .put("k2", "a", Duration::from_millis(10))
            .expect("put");
        std::thread::sleep(Duration::from_millis(20));
        assert!(!store
            .refresh_if_value("k2", "a", Duration::from_secs(5))
            .expect("refresh expired"));
    }

    #[test]
    fn remove_if_value_spares_other_owners() {
        let store = InMemoryTtlStore::new();
        store.put("k", "a", Duration::from_secs(5)).expect("put");
        store.remove_if_value("k", "b").expect("remove other");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("a"));
        store.remove_if_value("k", "a").expect("remove owner");
        assert_eq!(store.get("k").expect("get"), None);
    }
}
