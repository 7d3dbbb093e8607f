//! Cache engine configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::store::{CacheStore, MemoryStore, RedisStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

/// Configuration for the cache engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Which store backend to build.
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Redis connection URL (used when `backend` is `redis`).
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Connection pool size for the Redis backend.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Prefix prepended to every backend key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// TTL applied when a caller does not specify one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_pool_size() -> usize {
    16
}

fn default_key_prefix() -> String {
    "readshelf".to_string()
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from `READSHELF_CACHE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(backend) = std::env::var("READSHELF_CACHE_BACKEND") {
            config.backend = match backend.to_lowercase().as_str() {
                "memory" => BackendKind::Memory,
                "redis" => BackendKind::Redis,
                other => {
                    return Err(CacheError::configuration(format!(
                        "unknown cache backend '{other}' (expected 'memory' or 'redis')"
                    )));
                }
            };
        }
        if let Ok(url) = std::env::var("READSHELF_CACHE_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(size) = std::env::var("READSHELF_CACHE_POOL_SIZE") {
            config.pool_size = size.parse().map_err(|_| {
                CacheError::configuration(format!("invalid pool size '{size}'"))
            })?;
        }
        if let Ok(prefix) = std::env::var("READSHELF_CACHE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Ok(ttl) = std::env::var("READSHELF_CACHE_DEFAULT_TTL") {
            config.default_ttl_secs = ttl.parse().map_err(|_| {
                CacheError::configuration(format!("invalid default TTL '{ttl}'"))
            })?;
        }
        Ok(config)
    }

    /// Construct the store this configuration describes.
    pub fn build_store(&self) -> Result<Arc<dyn CacheStore>> {
        match self.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
            BackendKind::Redis => Ok(Arc::new(RedisStore::from_url(
                &self.redis_url,
                self.pool_size,
            )?)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.key_prefix, "readshelf");
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"backend": "redis", "pool_size": 4}"#).unwrap();
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_build_memory_store() {
        let store = CacheConfig::default().build_store().unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
