//! Redis-backed store over a deadpool connection pool.

use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;

use super::CacheStore;
use crate::error::{CacheError, Result};

/// Production `CacheStore` implementation on top of Redis.
///
/// All operations borrow a pooled multiplexed connection; pool exhaustion and
/// connection failures surface as `CacheError::Backend` and are absorbed by
/// the fail-open policy in `CacheManager`.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Create a store from an existing connection pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store by connecting to the given Redis URL.
    pub fn from_url(url: &str, pool_size: usize) -> Result<Self> {
        let mut cfg = PoolConfig::from_url(url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::configuration(format!("invalid redis config: {e}")))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(CacheError::from)
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        if ttl.is_zero() {
            conn.set::<_, _, ()>(key, value).await?;
        } else {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut conn = self.conn().await?;
        let written: bool = conn.set_nx(key, value).await?;
        Ok(written)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(keys.to_vec()).await?;
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, amount).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated: i64 = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(updated == 1)
    }

    async fn sadd(&self, set_key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(set_key, member).await?;
        Ok(())
    }

    async fn smembers(&self, set_key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(set_key).await?;
        Ok(members)
    }

    async fn srem(&self, set_key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = conn.srem(set_key, members.to_vec()).await?;
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
