//! On-wire envelope for cached values.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// What actually gets stored in the backend: the value plus the metadata
/// needed to validate it on read and to account for it in stats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    /// Namespace version at write time. A read under a newer version treats
    /// the entry as stale. Zero for non-namespaced entries, which skip the
    /// version check.
    pub namespace_version: u64,
    /// Unix timestamp of the write, for stats and debugging.
    pub created_at: i64,
    pub ttl_seconds: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(value: Value, namespace_version: u64, ttl_seconds: u64, tags: Vec<String>) -> Self {
        Self {
            value,
            namespace_version,
            created_at: Utc::now().timestamp(),
            ttl_seconds,
            tags,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}
