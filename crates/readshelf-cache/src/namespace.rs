//! Namespace version counters.
//!
//! Every namespaced cache key embeds the namespace's current version.
//! Bumping the counter makes all prior keys unreachable in O(1); the
//! orphaned entries age out through their TTLs.

use std::sync::Arc;

use crate::error::Result;
use crate::store::CacheStore;

/// Monotonic per-namespace version counters stored in the backend.
///
/// Versions are read from the store on every use rather than cached
/// locally, so a bump performed by one process is visible to all.
#[derive(Clone)]
pub struct NamespaceVersionIndex {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl NamespaceVersionIndex {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Backend key holding the version counter for `namespace`.
    pub fn version_key(&self, namespace: &str) -> String {
        format!("{}:ns_version:{namespace}", self.prefix)
    }

    /// Current version of `namespace`, initializing the counter to 1 on
    /// first use. Initialization goes through `set_nx` so racing first
    /// readers all land on the same version: one writes 1, the rest read
    /// it back.
    pub async fn current_version(&self, namespace: &str) -> Result<u64> {
        let key = self.version_key(namespace);
        if let Some(raw) = self.store.get(&key).await? {
            if let Some(version) = parse_version(&raw) {
                return Ok(version);
            }
            // Corrupt counter. Drop it and reinitialize rather than serve
            // entries keyed on an unparseable version.
            tracing::warn!(key = %key, "namespace version counter corrupt, reinitializing");
            self.store.delete(std::slice::from_ref(&key)).await?;
        }
        if self.store.set_nx(&key, b"1").await? {
            return Ok(1);
        }
        // Lost the initialization race; the winner's value is in place.
        match self.store.get(&key).await? {
            Some(raw) => Ok(parse_version(&raw).unwrap_or(1)),
            None => Ok(1),
        }
    }

    /// Advance the namespace to a new version, invalidating every entry
    /// written under the old one. Returns the new version.
    pub async fn bump(&self, namespace: &str) -> Result<u64> {
        let key = self.version_key(namespace);
        let version = self.store.incr(&key, 1).await?;
        tracing::info!(namespace = %namespace, version, "namespace version bumped");
        Ok(version.max(1) as u64)
    }

    /// All namespaces that currently have a version counter.
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        let pattern = format!("{}:ns_version:*", self.prefix);
        let marker = format!("{}:ns_version:", self.prefix);
        let keys = self.store.scan(&pattern).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&marker).map(str::to_owned))
            .collect())
    }
}

fn parse_version(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok().and_then(|s| s.parse().ok())
}
