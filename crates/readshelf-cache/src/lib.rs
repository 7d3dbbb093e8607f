//! Caching and invalidation engine.
//!
//! A read-through cache over a key-value store with two invalidation
//! strategies: namespace version bumping (O(1) bulk invalidation, entries
//! reclaimed passively by TTL) and tag indexing (selective invalidation
//! across unrelated keys). Concurrent recomputation of the same key is
//! coalesced in-process by a single-flight guard.
//!
//! The engine is best-effort by design: backend and serialization failures
//! degrade to cache misses and are logged and counted, never propagated
//! into the calling operation. Only configuration errors surface, and only
//! at construction time.

pub mod cached;
pub mod config;
pub mod error;
pub mod keys;
pub mod manager;
pub mod metrics;
pub mod namespace;
pub mod serialize;
pub mod singleflight;
pub mod store;
pub mod tags;

pub use cached::{Cached, CachedOptions, InvalidationRules, invalidate_after};
pub use config::{BackendKind, CacheConfig};
pub use error::{CacheError, ErrorCategory, Result};
pub use manager::{CacheManager, CacheStats, NamespaceStats, SetOptions};
pub use namespace::NamespaceVersionIndex;
pub use serialize::CacheEntry;
pub use singleflight::SingleFlight;
pub use store::{CacheStore, MemoryStore, RedisStore};
pub use tags::TagIndex;
