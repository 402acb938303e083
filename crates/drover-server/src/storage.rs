//! Storage backend selection and startup health checks.

use std::collections::HashMap;
use std::sync::Arc;

use drover_core::{InMemoryRunStore, RunStore};
use drover_runtime::{InMemoryTtlStore, TtlStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub sqlite_db_path: String,
}

impl StorageConfig {
    pub fn from_env(default_sqlite_db_path: &str) -> Result<Self, String> {
        let mut envs = HashMap::new();
        for key in ["DROVER_STORE_BACKEND", "DROVER_SQLITE_DB"] {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(default_sqlite_db_path, &envs)
    }

    fn from_env_map(
        default_sqlite_db_path: &str,
        envs: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let backend_raw = envs
            .get("DROVER_STORE_BACKEND")
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "sqlite".to_string());
        let backend = match backend_raw.as_str() {
            "memory" => StorageBackend::Memory,
            "sqlite" => StorageBackend::Sqlite,
            other => {
                return Err(format!(
                    "invalid DROVER_STORE_BACKEND='{}'. expected one of: memory, sqlite",
                    other
                ));
            }
        };
        let sqlite_db_path = envs
            .get("DROVER_SQLITE_DB")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default_sqlite_db_path.to_string());
        Ok(Self {
            backend,
            sqlite_db_path,
        })
    }

    /// Opens the run store and the shared TTL store for the selected
    /// backend, failing fast at startup when the backend is unusable.
    pub fn build(&self) -> Result<(Arc<dyn RunStore>, Arc<dyn TtlStore>), String> {
        match self.backend {
            StorageBackend::Memory => Ok((
                Arc::new(InMemoryRunStore::new()),
                Arc::new(InMemoryTtlStore::new()),
            )),
            StorageBackend::Sqlite => self.build_sqlite(),
        }
    }

    #[cfg(feature = "sqlite-persistence")]
    fn build_sqlite(&self) -> Result<(Arc<dyn RunStore>, Arc<dyn TtlStore>), String> {
        let runs = drover_core::SqliteRunStore::new(&self.sqlite_db_path).map_err(|e| {
            format!(
                "sqlite run store failed for DROVER_SQLITE_DB='{}': {}",
                self.sqlite_db_path, e
            )
        })?;
        let kv = drover_runtime::SqliteTtlStore::new(&self.sqlite_db_path).map_err(|e| {
            format!(
                "sqlite ttl store failed for DROVER_SQLITE_DB='{}': {}",
                self.sqlite_db_path, e
            )
        })?;
        Ok((Arc::new(runs), Arc::new(kv)))
    }

    #[cfg(not(feature = "sqlite-persistence"))]
    fn build_sqlite(&self) -> Result<(Arc<dyn RunStore>, Arc<dyn TtlStore>), String> {
        Err(
            "DROVER_STORE_BACKEND=sqlite requires feature 'sqlite-persistence'. \
             Rebuild with --features \"sqlite-persistence\" or set DROVER_STORE_BACKEND=memory."
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_sqlite_backend() {
        let cfg =
            StorageConfig::from_env_map("drover.db", &HashMap::new()).expect("default config");
        assert_eq!(cfg.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.sqlite_db_path, "drover.db");
    }

    #[test]
    fn invalid_backend_fails() {
        let envs = HashMap::from([("DROVER_STORE_BACKEND".to_string(), "redis".to_string())]);
        let err = StorageConfig::from_env_map("drover.db", &envs).expect_err("must fail");
        assert!(err.contains("DROVER_STORE_BACKEND"));
    }

    #[test]
    fn memory_backend_builds() {
        let envs = HashMap::from([("DROVER_STORE_BACKEND".to_string(), "memory".to_string())]);
        let cfg = StorageConfig::from_env_map("drover.db", &envs).expect("parse");
        cfg.build().expect("memory backend builds");
    }

    #[cfg(feature = "sqlite-persistence")]
    #[test]
    fn sqlite_backend_builds_on_a_fresh_path() {
        let path = std::env::temp_dir().join(format!(
            "drover-storage-config-{}.db",
            uuid::Uuid::new_v4()
        ));
        let envs = HashMap::from([
            ("DROVER_STORE_BACKEND".to_string(), "sqlite".to_string()),
            (
                "DROVER_SQLITE_DB".to_string(),
                path.to_string_lossy().to_string(),
            ),
        ]);
        let cfg = StorageConfig::from_env_map("drover.db", &envs).expect("parse");
        cfg.build().expect("sqlite backend builds");
        let _ = std::fs::remove_file(path);
    }
}
