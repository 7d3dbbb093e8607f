//! Cache manager facade.
//!
//! All operations are best-effort: backend and serialization failures are
//! logged, counted, and degrade to a miss (or a no-op for writes) instead of
//! surfacing to the caller. Only configuration problems are returned as
//! errors, and only from constructors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::metrics;
use crate::namespace::NamespaceVersionIndex;
use crate::serialize::CacheEntry;
use crate::store::CacheStore;
use crate::tags::TagIndex;

/// Options for a cache write. Unset fields use the manager's defaults.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub namespace: Option<String>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-namespace statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NamespaceStats {
    pub name: String,
    pub version: u64,
    pub live_entries: u64,
}

/// Snapshot of the cache's contents, produced by a full keyspace scan.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub key_prefix: String,
    pub total_entries: u64,
    pub namespaces: Vec<NamespaceStats>,
}

/// Facade over the store, the namespace version index, and the tag index.
///
/// Constructed once at startup and shared by `Arc`. Namespaced entries are
/// stored under `{prefix}:{namespace}:{version}:{key}`; entries without a
/// namespace under `{prefix}:global:{key}` and skip the version check.
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    versions: NamespaceVersionIndex,
    tags: TagIndex,
    prefix: String,
    default_ttl: Duration,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            versions: NamespaceVersionIndex::new(store.clone(), config.key_prefix.clone()),
            tags: TagIndex::new(store.clone(), config.key_prefix.clone()),
            prefix: config.key_prefix.clone(),
            default_ttl: config.default_ttl(),
            store,
        }
    }

    /// Build the store described by `config` and wrap it in a manager.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self::new(config.build_store()?, config))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Compose the full backend key and the namespace version it embeds
    /// (zero for non-namespaced keys).
    async fn full_key(&self, key: &str, namespace: Option<&str>) -> Result<(String, u64)> {
        match namespace {
            Some(ns) => {
                let version = self.versions.current_version(ns).await?;
                Ok((format!("{}:{ns}:{version}:{key}", self.prefix), version))
            }
            None => Ok((format!("{}:global:{key}", self.prefix), 0)),
        }
    }

    fn note_failure(&self, op: &'static str, err: &CacheError) {
        tracing::warn!(op, error = %err, "cache operation failed, degrading");
        metrics::record_error(&err.category().to_string());
    }

    /// Read a cached value. Any failure along the way is a miss.
    pub async fn get(&self, key: &str, namespace: Option<&str>) -> Option<Value> {
        let started = Instant::now();
        let result = self.try_get(key, namespace).await;
        metrics::record_op_duration("get", started.elapsed());
        match result {
            Ok(value) => value,
            Err(err) => {
                self.note_failure("get", &err);
                None
            }
        }
    }

    async fn try_get(&self, key: &str, namespace: Option<&str>) -> Result<Option<Value>> {
        let ns_label = namespace.unwrap_or("global");
        let (full_key, version) = self.full_key(key, namespace).await?;
        let Some(raw) = self.store.get(&full_key).await? else {
            metrics::record_miss(ns_label);
            tracing::debug!(key = %full_key, "cache miss");
            return Ok(None);
        };
        let entry = match CacheEntry::decode(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                // Undecodable entries are removed so they cannot keep
                // failing on every read.
                tracing::warn!(key = %full_key, error = %err, "corrupt cache entry, deleting");
                metrics::record_error("serialization");
                self.store.delete(std::slice::from_ref(&full_key)).await?;
                metrics::record_miss(ns_label);
                return Ok(None);
            }
        };
        if namespace.is_some() && entry.namespace_version != version {
            // The key already encodes the version, so this only fires when
            // an entry was written under a mismatched envelope. Treat it as
            // dead and reclaim it eagerly.
            tracing::debug!(key = %full_key, stored = entry.namespace_version, current = version,
                "stale namespace version, deleting");
            self.store.delete(std::slice::from_ref(&full_key)).await?;
            metrics::record_miss(ns_label);
            return Ok(None);
        }
        metrics::record_hit(ns_label);
        tracing::debug!(key = %full_key, "cache hit");
        Ok(Some(entry.value))
    }

    /// Write a value. Returns false (after logging) if the write failed.
    pub async fn set(&self, key: &str, value: &Value, options: &SetOptions) -> bool {
        let started = Instant::now();
        let result = self.try_set(key, value, options).await;
        metrics::record_op_duration("set", started.elapsed());
        match result {
            Ok(()) => true,
            Err(err) => {
                self.note_failure("set", &err);
                false
            }
        }
    }

    async fn try_set(&self, key: &str, value: &Value, options: &SetOptions) -> Result<()> {
        let namespace = options.namespace.as_deref();
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let (full_key, version) = self.full_key(key, namespace).await?;
        let entry = CacheEntry::new(value.clone(), version, ttl.as_secs(), options.tags.clone());
        self.store.set(&full_key, &entry.encode()?, ttl).await?;
        if !options.tags.is_empty() {
            self.tags.attach(&full_key, &options.tags).await?;
        }
        metrics::record_set(namespace.unwrap_or("global"));
        tracing::debug!(key = %full_key, ttl_secs = ttl.as_secs(), "cache set");
        Ok(())
    }

    /// Delete one entry. Returns true if it existed.
    pub async fn delete(&self, key: &str, namespace: Option<&str>) -> bool {
        match self.try_delete_many(&[key.to_owned()], namespace).await {
            Ok(removed) => removed > 0,
            Err(err) => {
                self.note_failure("delete", &err);
                false
            }
        }
    }

    /// Whether a live, decodable entry exists for `key`.
    pub async fn exists(&self, key: &str, namespace: Option<&str>) -> bool {
        self.get(key, namespace).await.is_some()
    }

    /// Reset the TTL of an existing entry. Returns false if absent or on
    /// backend failure.
    pub async fn touch(&self, key: &str, namespace: Option<&str>, ttl: Duration) -> bool {
        let result = async {
            let (full_key, _) = self.full_key(key, namespace).await?;
            self.store.expire(&full_key, ttl).await
        }
        .await;
        match result {
            Ok(updated) => updated,
            Err(err) => {
                self.note_failure("touch", &err);
                false
            }
        }
    }

    /// Atomically adjust a raw integer counter stored under `key`.
    ///
    /// Counters bypass the entry envelope; do not mix `increment` and `set`
    /// on the same key. Returns the new value, or `None` on failure.
    pub async fn increment(&self, key: &str, namespace: Option<&str>, amount: i64) -> Option<i64> {
        let result = async {
            let (full_key, _) = self.full_key(key, namespace).await?;
            self.store.incr(&full_key, amount).await
        }
        .await;
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.note_failure("increment", &err);
                None
            }
        }
    }

    pub async fn decrement(&self, key: &str, namespace: Option<&str>, amount: i64) -> Option<i64> {
        self.increment(key, namespace, -amount).await
    }

    /// Fetch several keys from one namespace. Missing or failed keys are
    /// simply absent from the result.
    pub async fn get_many(&self, keys: &[String], namespace: Option<&str>) -> HashMap<String, Value> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key, namespace).await {
                found.insert(key.clone(), value);
            }
        }
        found
    }

    /// Write several entries with shared options. Returns how many writes
    /// succeeded.
    pub async fn set_many(&self, entries: &[(String, Value)], options: &SetOptions) -> usize {
        let mut written = 0;
        for (key, value) in entries {
            if self.set(key, value, options).await {
                written += 1;
            }
        }
        written
    }

    /// Delete several keys. Returns how many existed.
    pub async fn delete_many(&self, keys: &[String], namespace: Option<&str>) -> u64 {
        match self.try_delete_many(keys, namespace).await {
            Ok(removed) => removed,
            Err(err) => {
                self.note_failure("delete_many", &err);
                0
            }
        }
    }

    async fn try_delete_many(&self, keys: &[String], namespace: Option<&str>) -> Result<u64> {
        let mut full_keys = Vec::with_capacity(keys.len());
        for key in keys {
            let (full_key, _) = self.full_key(key, namespace).await?;
            full_keys.push(full_key);
        }
        self.store.delete(&full_keys).await
    }

    /// Invalidate every entry in a namespace by bumping its version.
    ///
    /// O(1) regardless of how many entries the namespace holds; the orphaned
    /// entries expire through their TTLs. Returns the new version, or `None`
    /// if the bump failed (in which case the namespace keeps serving the old
    /// generation).
    pub async fn invalidate_namespace(&self, namespace: &str) -> Option<u64> {
        match self.versions.bump(namespace).await {
            Ok(version) => {
                metrics::record_invalidation("namespace", 1);
                Some(version)
            }
            Err(err) => {
                self.note_failure("invalidate_namespace", &err);
                None
            }
        }
    }

    /// Delete every entry carrying any of the given tags. Returns the number
    /// of distinct entries removed.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> u64 {
        match self.tags.invalidate(tags).await {
            Ok(removed) => {
                metrics::record_invalidation("tags", removed);
                removed
            }
            Err(err) => {
                self.note_failure("invalidate_by_tags", &err);
                0
            }
        }
    }

    /// Delete every key matching a glob pattern, scoped under the manager's
    /// prefix and, when given, a namespace's current version segment. A full
    /// keyspace scan; operator use only.
    pub async fn clear_pattern(&self, pattern: &str, namespace: Option<&str>) -> u64 {
        let result = async {
            let full_pattern = match namespace {
                Some(ns) => {
                    let version = self.versions.current_version(ns).await?;
                    format!("{}:{ns}:{version}:{pattern}", self.prefix)
                }
                None => format!("{}:{pattern}", self.prefix),
            };
            let keys = self.store.scan(&full_pattern).await?;
            self.store.delete(&keys).await
        }
        .await;
        match result {
            Ok(removed) => {
                metrics::record_invalidation("pattern", removed);
                tracing::info!(pattern = %pattern, removed, "cleared by pattern");
                removed
            }
            Err(err) => {
                self.note_failure("clear_pattern", &err);
                0
            }
        }
    }

    /// Current namespaces, versions, and live entry counts.
    ///
    /// Performs one scan per namespace; intended for the admin surface, not
    /// the hot path.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut namespaces = Vec::new();
        let mut total = 0;
        let mut names = self.versions.namespaces().await?;
        names.sort();
        for name in names {
            let version = self.versions.current_version(&name).await?;
            let pattern = format!("{}:{name}:{version}:*", self.prefix);
            let live = self.store.scan(&pattern).await?.len() as u64;
            total += live;
            namespaces.push(NamespaceStats {
                name,
                version,
                live_entries: live,
            });
        }
        Ok(CacheStats {
            backend: self.store.backend_name(),
            key_prefix: self.prefix.clone(),
            total_entries: total,
            namespaces,
        })
    }
}
