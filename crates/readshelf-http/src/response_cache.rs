//! Response caching middleware.
//!
//! Caches whole HTTP responses keyed by path, normalized query string,
//! selected headers, and optionally the authenticated principal. Only GET
//! and HEAD requests are considered; error statuses and oversized or
//! non-textual bodies pass through uncached. Every considered response
//! carries an `X-Cache: HIT|MISS` header.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::HeaderValue;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use readshelf_cache::{CacheManager, SetOptions};

/// Bodies larger than this are served but not cached.
const MAX_CACHEABLE_BODY: usize = 1024 * 1024;

const X_CACHE: &str = "x-cache";

/// Hop-by-hop and length headers are recomputed for the replayed body.
const STRIPPED_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection", X_CACHE];

/// Authenticated principal, inserted into request extensions by the auth
/// layer. When `include_user_id` is set, responses are partitioned per id.
#[derive(Debug, Clone)]
pub struct CachedPrincipal {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct ResponseCacheOptions {
    pub ttl: Duration,
    pub key_prefix: String,
    pub namespace: Option<String>,
    /// Fold the (sorted) query string into the key.
    pub include_query_params: bool,
    /// Partition entries by the authenticated principal's id.
    pub include_user_id: bool,
    /// Request headers whose values become part of the key.
    pub vary_by_headers: Vec<String>,
    /// Response statuses that are never cached.
    pub skip_cache_for_status: Vec<u16>,
    /// Exact paths that bypass the cache entirely.
    pub exclude_paths: Vec<String>,
    /// Path prefixes that bypass the cache entirely.
    pub exclude_prefixes: Vec<String>,
}

impl Default for ResponseCacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            key_prefix: "response".to_string(),
            namespace: None,
            include_query_params: true,
            include_user_id: false,
            vary_by_headers: Vec::new(),
            skip_cache_for_status: vec![400, 401, 403, 404, 500],
            exclude_paths: Vec::new(),
            exclude_prefixes: Vec::new(),
        }
    }
}

impl ResponseCacheOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn include_user_id(mut self, include: bool) -> Self {
        self.include_user_id = include;
        self
    }

    pub fn vary_by_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.vary_by_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude_prefixes(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|p| p == path)
            || self.exclude_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// State handed to `response_cache_middleware` via
/// `axum::middleware::from_fn_with_state`.
#[derive(Clone)]
pub struct ResponseCacheState {
    pub manager: Arc<CacheManager>,
    pub options: Arc<ResponseCacheOptions>,
}

impl ResponseCacheState {
    pub fn new(manager: Arc<CacheManager>, options: ResponseCacheOptions) -> Self {
        Self {
            manager,
            options: Arc::new(options),
        }
    }
}

/// Stored representation of a cacheable response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

pub async fn response_cache_middleware(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }
    if state.options.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let principal = request.extensions().get::<CachedPrincipal>().cloned();
    let key = build_cache_key(
        &state.options,
        request.uri(),
        request.headers(),
        principal.as_ref(),
    );
    let namespace = state.options.namespace.as_deref();

    if let Some(value) = state.manager.get(&key, namespace).await {
        match serde_json::from_value::<CachedResponse>(value) {
            Ok(cached) => return replay(cached),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "cached response no longer deserializes, deleting");
                state.manager.delete(&key, namespace).await;
            }
        }
    }

    let response = next.run(request).await;
    store_and_mark(&state, &key, response).await
}

/// `{prefix}:{path}[:{sorted query}][,{header}={value}...][:user={id}]`.
fn build_cache_key(
    options: &ResponseCacheOptions,
    uri: &Uri,
    headers: &HeaderMap,
    principal: Option<&CachedPrincipal>,
) -> String {
    let mut key = format!("{}:{}", options.key_prefix, uri.path());
    if options.include_query_params {
        if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
            // Sort parameters so call-site ordering does not split entries.
            let mut params: Vec<&str> = query.split('&').collect();
            params.sort_unstable();
            key.push(':');
            key.push_str(&params.join("&"));
        }
    }
    for name in &options.vary_by_headers {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            key.push_str(&format!(",{name}={value}"));
        }
    }
    if options.include_user_id {
        if let Some(principal) = principal {
            key.push_str(&format!(":user={}", principal.id));
        }
    }
    key
}

fn replay(cached: CachedResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK));
    for (name, value) in &cached.headers {
        builder = builder.header(name, value);
    }
    builder = builder.header(X_CACHE, "HIT");
    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn store_and_mark(state: &ResponseCacheState, key: &str, response: Response) -> Response {
    let status = response.status().as_u16();
    if state.options.skip_cache_for_status.contains(&status) {
        return mark_miss(response);
    }

    // A body with a declared oversized length is served as-is, unbuffered.
    let declared_len = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > MAX_CACHEABLE_BODY) {
        return mark_miss(response);
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            // The handler's body stream itself failed; there is nothing
            // left to serve.
            tracing::warn!(key = %key, error = %err, "response body failed while buffering");
            return mark_miss(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    if bytes.len() <= MAX_CACHEABLE_BODY {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            let headers = parts
                .headers
                .iter()
                .filter(|(name, _)| !STRIPPED_HEADERS.contains(&name.as_str()))
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let cached = CachedResponse {
                status,
                headers,
                body: text.to_string(),
            };
            if let Ok(value) = serde_json::to_value(&cached) {
                let opts = SetOptions {
                    ttl: Some(state.options.ttl),
                    namespace: state.options.namespace.clone(),
                    tags: Vec::new(),
                };
                state.manager.set(key, &value, &opts).await;
            }
        }
    }

    mark_miss(Response::from_parts(parts, Body::from(bytes)))
}

fn mark_miss(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use readshelf_cache::{CacheConfig, MemoryStore};

    fn options() -> ResponseCacheOptions {
        ResponseCacheOptions::default()
    }

    #[test]
    fn test_key_sorts_query_params() {
        let opts = options();
        let a = build_cache_key(
            &opts,
            &"/books?b=2&a=1".parse().unwrap(),
            &HeaderMap::new(),
            None,
        );
        let b = build_cache_key(
            &opts,
            &"/books?a=1&b=2".parse().unwrap(),
            &HeaderMap::new(),
            None,
        );
        assert_eq!(a, b);
        assert_eq!(a, "response:/books:a=1&b=2");
    }

    #[test]
    fn test_key_without_query() {
        let key = build_cache_key(&options(), &"/books".parse().unwrap(), &HeaderMap::new(), None);
        assert_eq!(key, "response:/books");
    }

    #[test]
    fn test_key_folds_vary_headers_and_user() {
        let opts = options()
            .vary_by_headers(["accept-language"])
            .include_user_id(true);
        let mut headers = HeaderMap::new();
        headers.insert("accept-language", HeaderValue::from_static("fr"));
        let principal = CachedPrincipal { id: "42".into() };
        let key = build_cache_key(
            &opts,
            &"/books".parse().unwrap(),
            &headers,
            Some(&principal),
        );
        assert_eq!(key, "response:/books,accept-language=fr:user=42");
    }

    #[test]
    fn test_key_skips_absent_vary_header() {
        let opts = options().vary_by_headers(["accept-language"]);
        let key = build_cache_key(&opts, &"/books".parse().unwrap(), &HeaderMap::new(), None);
        assert_eq!(key, "response:/books");
    }

    #[tokio::test]
    async fn test_replay_rebuilds_the_stored_response() {
        let config = CacheConfig {
            key_prefix: "t".into(),
            ..CacheConfig::default()
        };
        let manager = Arc::new(CacheManager::new(Arc::new(MemoryStore::new()), &config));
        let state = ResponseCacheState::new(manager.clone(), options());

        let stored = json!({
            "status": 200,
            "headers": [["content-type", "application/json"]],
            "body": "{\"ok\":true}"
        });
        manager
            .set("response:/books", &stored, &SetOptions::new().ttl(state.options.ttl))
            .await;

        let value = manager.get("response:/books", None).await.unwrap();
        let cached: CachedResponse = serde_json::from_value(value).unwrap();
        let response = replay(cached);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}
