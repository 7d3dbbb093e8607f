//! Reverse index from tags to the cache keys they cover.
//!
//! Attaching a tag adds the full backend key to the set at
//! `{prefix}:tags:{tag}`. Invalidating tags deletes the union of the
//! tagged keys plus the tag sets themselves. Tag sets carry no TTL, so a
//! set may reference keys that have already expired; deleting an absent
//! key is a no-op and only keys that still existed are counted.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::store::CacheStore;

#[derive(Clone)]
pub struct TagIndex {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl TagIndex {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tags:{tag}", self.prefix)
    }

    /// Record that `key` belongs to each of `tags`.
    pub async fn attach(&self, key: &str, tags: &[String]) -> Result<()> {
        for tag in tags {
            self.store.sadd(&self.tag_key(tag), key).await?;
        }
        Ok(())
    }

    /// Delete every entry carrying any of `tags`, then the tag sets.
    ///
    /// Keys tagged with several of the given tags are deleted and counted
    /// once. Returns the number of distinct live entries removed.
    pub async fn invalidate(&self, tags: &[String]) -> Result<u64> {
        let mut keys = HashSet::new();
        for tag in tags {
            for member in self.store.smembers(&self.tag_key(tag)).await? {
                keys.insert(member);
            }
        }
        let keys: Vec<String> = keys.into_iter().collect();
        let removed = self.store.delete(&keys).await?;

        let set_keys: Vec<String> = tags.iter().map(|t| self.tag_key(t)).collect();
        self.store.delete(&set_keys).await?;

        tracing::debug!(tags = ?tags, removed, "invalidated by tags");
        Ok(removed)
    }

    /// Members of one tag set, for stats and debugging.
    pub async fn members(&self, tag: &str) -> Result<Vec<String>> {
        self.store.smembers(&self.tag_key(tag)).await
    }
}
