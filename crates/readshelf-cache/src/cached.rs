//! Caching combinators for function results.
//!
//! `Cached` wraps an async computation with a read-through cache: on a miss
//! the computation runs once under single-flight protection and its result
//! is stored for subsequent calls. `None` results are returned but never
//! cached, so an absent row does not pin a negative entry. `invalidate_after`
//! wraps a mutation and fires invalidation only after it succeeds.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::keys;
use crate::manager::{CacheManager, SetOptions};
use crate::singleflight::SingleFlight;

type ConditionFn = dyn Fn(&[Value]) -> bool + Send + Sync;
type KeyBuilderFn = dyn Fn(&[Value]) -> String + Send + Sync;

/// Options for a `Cached` combinator. `ttl: None` uses the manager default.
#[derive(Debug, Clone)]
pub struct CachedOptions {
    pub key_prefix: String,
    pub ttl: Option<Duration>,
    pub namespace: Option<String>,
    pub tags: Vec<String>,
    /// Fold argument type names into keys so `1` and `"1"` stay distinct.
    pub include_arg_types: bool,
}

impl CachedOptions {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ttl: None,
            namespace: None,
            tags: Vec::new(),
            include_arg_types: false,
        }
    }

    /// Defaults for cached listings: shorter TTL, since listings change
    /// whenever any member does.
    pub fn list(key_prefix: impl Into<String>) -> Self {
        Self::new(key_prefix).ttl(Duration::from_secs(1800))
    }

    /// Defaults for cached pages: the shortest TTL, pages shift under
    /// inserts and deletes.
    pub fn paginated(key_prefix: impl Into<String>) -> Self {
        Self::new(key_prefix).ttl(Duration::from_secs(900))
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

    pub fn include_arg_types(mut self, include: bool) -> Self {
        self.include_arg_types = include;
        self
    }
}

/// A read-through cache around one logical function.
///
/// `T` is the computed value; `E` the computation's error. Errors are
/// broadcast verbatim to every coalesced caller and never cached, so they
/// must be `Clone` (wrap non-cloneable errors in `Arc`).
pub struct Cached<T, E> {
    manager: Arc<CacheManager>,
    options: CachedOptions,
    condition: Option<Arc<ConditionFn>>,
    key_builder: Option<Arc<KeyBuilderFn>>,
    flights: SingleFlight<Result<Option<T>, E>>,
}

impl<T, E> Cached<T, E>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    pub fn new(manager: Arc<CacheManager>, options: CachedOptions) -> Self {
        Self {
            manager,
            options,
            condition: None,
            key_builder: None,
            flights: SingleFlight::new(),
        }
    }

    /// Cache for a single model instance: keys are `{model}:{id}` and every
    /// entry carries the model name as a tag, so one tag invalidation covers
    /// every cached instance of the model.
    pub fn for_model(manager: Arc<CacheManager>, model: &str) -> Self {
        let model_name = model.to_lowercase();
        let options = CachedOptions::new(model_name.clone()).tags([model_name.clone()]);
        Self::new(manager, options).with_key_builder(move |args| {
            keys::model_key(&model_name, args.first().unwrap_or(&Value::Null))
        })
    }

    /// Skip the cache entirely (no read, no write, no coalescing) when the
    /// predicate returns false for the call's arguments.
    pub fn with_condition(
        mut self,
        condition: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Replace the default argument-hash key with a custom one.
    pub fn with_key_builder(
        mut self,
        builder: impl Fn(&[Value]) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_builder = Some(Arc::new(builder));
        self
    }

    fn build_key(&self, args: &[Value]) -> String {
        match &self.key_builder {
            Some(builder) => builder(args),
            None => keys::generate_key(
                &self.options.key_prefix,
                args,
                self.options.include_arg_types,
            ),
        }
    }

    fn set_options(&self) -> SetOptions {
        SetOptions {
            ttl: self.options.ttl,
            namespace: self.options.namespace.clone(),
            tags: self.options.tags.clone(),
        }
    }

    /// Cached lookup stored under the key derived from `args`. On a miss the
    /// computation runs once per key across concurrent callers; followers
    /// receive a clone of the leader's result. `Ok(None)` and `Err` pass
    /// through uncached.
    pub async fn get_or_compute<F, Fut>(&self, args: &[Value], func: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(condition) = &self.condition {
            if !condition(args) {
                return func().await;
            }
        }
        self.get_or_compute_keyed(&self.build_key(args), func).await
    }

    /// Cached listing: the key folds the sorted, non-null filters.
    pub async fn get_or_compute_list<F, Fut>(
        &self,
        filters: &[(String, Value)],
        func: F,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = keys::list_key(&self.options.key_prefix, filters);
        self.get_or_compute_keyed(&key, func).await
    }

    /// Cached page of a listing: page and limit stay outside the filter
    /// hash so individual pages remain addressable.
    pub async fn get_or_compute_page<F, Fut>(
        &self,
        filters: &[(String, Value)],
        page: u64,
        limit: u64,
        func: F,
    ) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = keys::paginated_key(&self.options.key_prefix, filters, page, limit);
        self.get_or_compute_keyed(&key, func).await
    }

    async fn get_or_compute_keyed<F, Fut>(&self, key: &str, func: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let namespace = self.options.namespace.as_deref();
        if let Some(value) = self.read(key, namespace).await {
            return Ok(Some(value));
        }
        self.flights
            .work(key, || async {
                // A previous flight may have populated the entry while this
                // caller was queueing for leadership.
                if let Some(value) = self.read(key, namespace).await {
                    return Ok(Some(value));
                }
                let result = func().await;
                if let Ok(Some(value)) = &result {
                    self.write(key, value).await;
                }
                result
            })
            .await
    }

    async fn read(&self, key: &str, namespace: Option<&str>) -> Option<T> {
        let value = self.manager.get(key, namespace).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(err) => {
                // Shape drift (e.g. a deploy changed `T`). Drop the entry
                // and recompute.
                tracing::warn!(key = %key, error = %err, "cached value no longer deserializes, deleting");
                self.manager.delete(key, namespace).await;
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.manager.set(key, &json, &self.set_options()).await;
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "failed to serialize value for caching");
            }
        }
    }
}

/// What to invalidate after a successful mutation.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    pub namespace: Option<String>,
    pub tags: Vec<String>,
    pub patterns: Vec<String>,
}

impl InvalidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn patterns(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Run a mutation, then invalidate. Invalidation fires only when the
/// mutation returns `Ok`; a failed mutation leaves the cache untouched.
/// Invalidation failures are absorbed by the manager's fail-open policy and
/// never turn a successful mutation into an error.
pub async fn invalidate_after<T, E, F, Fut>(
    manager: &CacheManager,
    rules: &InvalidationRules,
    func: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = func().await?;
    if !rules.patterns.is_empty() {
        // Patterns narrow the invalidation to matching keys, scoped to the
        // namespace when one is set.
        for pattern in &rules.patterns {
            manager.clear_pattern(pattern, rules.namespace.as_deref()).await;
        }
    } else if let Some(namespace) = &rules.namespace {
        manager.invalidate_namespace(namespace).await;
    }
    if !rules.tags.is_empty() {
        manager.invalidate_by_tags(&rules.tags).await;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::config::CacheConfig;
    use crate::store::MemoryStore;

    fn manager() -> Arc<CacheManager> {
        let config = CacheConfig {
            key_prefix: "test".into(),
            ..CacheConfig::default()
        };
        Arc::new(CacheManager::new(Arc::new(MemoryStore::new()), &config))
    }

    type NoErr = std::convert::Infallible;

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let cached: Cached<String, NoErr> =
            Cached::new(manager(), CachedOptions::new("books.title"));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cached
                .get_or_compute(&[json!(7)], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("Dune".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(result.as_deref(), Some("Dune"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_results_are_never_cached() {
        let cached: Cached<String, NoErr> =
            Cached::new(manager(), CachedOptions::new("books.title"));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cached
                .get_or_compute(&[json!(404)], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert!(result.is_none());
        }
        // Every call recomputes: absence is not a cacheable fact here.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cached: Cached<String, Arc<String>> =
            Cached::new(manager(), CachedOptions::new("books.title"));

        let first: Result<Option<String>, _> = cached
            .get_or_compute(&[json!(1)], || async { Err(Arc::new("db down".to_string())) })
            .await;
        assert!(first.is_err());

        let second = cached
            .get_or_compute(&[json!(1)], || async { Ok(Some("ok".to_string())) })
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_condition_bypasses_cache() {
        let cached: Cached<String, NoErr> =
            Cached::new(manager(), CachedOptions::new("books.title"))
                .with_condition(|args| args.first() != Some(&json!("skip")));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cached
                .get_or_compute(&[json!("skip")], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("fresh".to_string()))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        let cached: Arc<Cached<u64, NoErr>> = Arc::new(Cached::new(
            manager(),
            CachedOptions::new("books.count"),
        ));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let cached = Arc::clone(&cached);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cached
                    .get_or_compute(&[], || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        Ok(Some(99))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(99));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_cache_invalidates_by_model_tag() {
        let manager = manager();
        let cached: Cached<Value, NoErr> = Cached::for_model(Arc::clone(&manager), "Book");

        cached
            .get_or_compute(&[json!(1)], || async { Ok(Some(json!({"id": 1}))) })
            .await
            .unwrap();
        cached
            .get_or_compute(&[json!(2)], || async { Ok(Some(json!({"id": 2}))) })
            .await
            .unwrap();

        assert_eq!(manager.invalidate_by_tags(&["book".into()]).await, 2);

        let calls = AtomicUsize::new(0);
        cached
            .get_or_compute(&[json!(1)], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!({"id": 1, "fresh": true})))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_list_and_page_keys_are_distinct() {
        let manager = manager();
        let lists: Cached<Vec<u64>, NoErr> =
            Cached::new(Arc::clone(&manager), CachedOptions::list("books.list"));

        let filters = vec![("genre".to_string(), json!("scifi"))];
        lists
            .get_or_compute_page(&filters, 1, 10, || async { Ok(Some(vec![1, 2])) })
            .await
            .unwrap();
        let page2 = lists
            .get_or_compute_page(&filters, 2, 10, || async { Ok(Some(vec![3, 4])) })
            .await
            .unwrap();
        assert_eq!(page2, Some(vec![3, 4]));

        let page1_again = lists
            .get_or_compute_page(&filters, 1, 10, || async { Ok(Some(vec![9, 9])) })
            .await
            .unwrap();
        assert_eq!(page1_again, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_invalidate_after_fires_only_on_success() {
        let manager = manager();
        let cached: Cached<u64, NoErr> = Cached::new(
            Arc::clone(&manager),
            CachedOptions::new("books.count").namespace("books"),
        );

        cached
            .get_or_compute(&[], || async { Ok(Some(10)) })
            .await
            .unwrap();

        // A failed mutation leaves the cached value intact.
        let failed: Result<(), &str> = invalidate_after(
            &manager,
            &InvalidationRules::new().namespace("books"),
            || async { Err("constraint violation") },
        )
        .await;
        assert!(failed.is_err());
        let calls = AtomicUsize::new(0);
        cached
            .get_or_compute(&[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(11))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // A successful mutation invalidates the namespace.
        let ok: Result<(), &str> = invalidate_after(
            &manager,
            &InvalidationRules::new().namespace("books"),
            || async { Ok(()) },
        )
        .await;
        assert!(ok.is_ok());
        cached
            .get_or_compute(&[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(12))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
