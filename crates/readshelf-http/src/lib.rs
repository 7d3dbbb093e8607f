//! HTTP-facing cache layer: response caching middleware and the operator
//! admin routes. Both consume a `CacheManager` (and the admin routes an
//! `InvalidationScheduler`) owned by the host application.

pub mod admin;
pub mod response_cache;

pub use admin::{AdminState, admin_router};
pub use response_cache::{
    CachedPrincipal, ResponseCacheOptions, ResponseCacheState, response_cache_middleware,
};
