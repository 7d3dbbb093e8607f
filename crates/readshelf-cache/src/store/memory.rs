//! In-memory store used for single-instance deployments and tests.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{CacheError, Result};

use super::CacheStore;

#[derive(Clone, Debug)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// DashMap-backed `CacheStore`.
///
/// Expired entries are evicted lazily on access and skipped during scans,
/// matching the passive-reclamation model of the Redis backend. Counters
/// share the main keyspace (an `incr` key holds its decimal representation),
/// so `scan` covers version counters exactly as it does on Redis.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries, for stats and tests.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn pattern_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    regex::Regex::new(&expr)
        .map_err(|e| CacheError::configuration(format!("invalid scan pattern '{pattern}': {e}")))
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.data.clone())),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_owned(), StoredValue::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired() => {
                occupied.insert(StoredValue::new(value.to_vec(), Duration::ZERO));
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value.to_vec(), Duration::ZERO));
                Ok(true)
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            let had_entry = matches!(
                self.entries.remove(key),
                Some((_, value)) if !value.is_expired()
            );
            // Like Redis DEL, removal is type-agnostic, and each key
            // counts at most once.
            let had_set = self.sets.remove(key).is_some();
            if had_entry || had_set {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = pattern_to_regex(pattern)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired() && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| StoredValue::new(b"0".to_vec(), Duration::ZERO));
        let current: i64 = std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CacheError::backend(format!("key '{key}' holds a non-integer value")))?;
        let next = current + amount;
        entry.data = next.to_string().into_bytes();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sadd(&self, set_key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(set_key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn smembers(&self, set_key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(set_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn srem(&self, set_key: &str, members: &[String]) -> Result<u64> {
        let mut removed = 0;
        if let Some(mut set) = self.sets.get_mut(set_key) {
            for member in members {
                if set.remove(member) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
