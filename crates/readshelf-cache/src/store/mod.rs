//! Key-value store abstraction for the cache engine.
//!
//! Any backend offering get/set-with-ttl/delete/scan/atomic-increment plus
//! set operations with atomic `incr`/`sadd` is substitutable. `RedisStore`
//! is the production backend; `MemoryStore` is used for single-instance
//! deployments and deterministic tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// The key-value store contract the cache engine runs against.
///
/// Implementations must be thread-safe (`Send + Sync`). A TTL of zero means
/// "no expiry". `delete` of a missing key is a no-op, not an error.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the raw bytes stored under `key`. Returns `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` under `key` with the given TTL (zero = no expiry).
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Writes `value` under `key` only if the key is absent, atomically.
    /// Returns true if the write happened. The key carries no TTL.
    async fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool>;

    /// Deletes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Returns every key matching a glob-style pattern (`*`, `?`).
    ///
    /// This is a full keyspace scan, O(n) in the backend size. Intended for
    /// operator-triggered invalidation and stats, not the request hot path.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Atomically increments the integer counter at `key` by `amount`,
    /// creating it at zero first if absent. Returns the new value.
    async fn incr(&self, key: &str, amount: i64) -> Result<i64>;

    /// Resets the TTL of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Adds `member` to the set at `set_key` (created on first add, no TTL).
    async fn sadd(&self, set_key: &str, member: &str) -> Result<()>;

    /// Returns all members of the set at `set_key` (empty if absent).
    async fn smembers(&self, set_key: &str) -> Result<Vec<String>>;

    /// Removes the given members from the set, returning how many existed.
    async fn srem(&self, set_key: &str, members: &[String]) -> Result<u64>;

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test that CacheStore is object-safe
    fn _assert_store_object_safe(_: &dyn CacheStore) {}
}
