//! End-to-end behavior of the cache engine over the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use readshelf_cache::{
    CacheConfig, CacheError, CacheManager, CacheStore, Cached, CachedOptions, InvalidationRules,
    MemoryStore, SetOptions, invalidate_after,
};

fn manager() -> Arc<CacheManager> {
    let config = CacheConfig {
        key_prefix: "it".into(),
        ..CacheConfig::default()
    };
    Arc::new(CacheManager::new(Arc::new(MemoryStore::new()), &config))
}

#[tokio::test]
async fn version_bump_scenario() {
    let manager = manager();
    let opts = SetOptions::new().namespace("users");

    assert!(manager.set("user:42", &json!({"name": "A"}), &opts).await);
    assert_eq!(
        manager.get("user:42", Some("users")).await,
        Some(json!({"name": "A"}))
    );

    let version = manager.invalidate_namespace("users").await.unwrap();
    assert_eq!(version, 2);
    assert_eq!(manager.get("user:42", Some("users")).await, None);

    assert!(manager.set("user:42", &json!({"name": "A"}), &opts).await);
    assert_eq!(
        manager.get("user:42", Some("users")).await,
        Some(json!({"name": "A"}))
    );
}

#[tokio::test]
async fn tag_invalidation_spans_namespaces() {
    let manager = manager();

    manager
        .set(
            "book:1",
            &json!("b1"),
            &SetOptions::new().namespace("books").tags(["author:7"]),
        )
        .await;
    manager
        .set(
            "review:9",
            &json!("r9"),
            &SetOptions::new().namespace("reviews").tags(["author:7"]),
        )
        .await;
    manager
        .set(
            "book:2",
            &json!("b2"),
            &SetOptions::new().namespace("books"),
        )
        .await;

    let removed = manager.invalidate_by_tags(&["author:7".into()]).await;
    assert_eq!(removed, 2);
    assert_eq!(manager.get("book:1", Some("books")).await, None);
    assert_eq!(manager.get("review:9", Some("reviews")).await, None);
    assert_eq!(manager.get("book:2", Some("books")).await, Some(json!("b2")));
}

#[tokio::test]
async fn stampede_collapses_to_one_computation() {
    let manager = manager();
    let cached: Arc<Cached<Value, std::convert::Infallible>> = Arc::new(Cached::new(
        Arc::clone(&manager),
        CachedOptions::new("report.daily").namespace("reports"),
    ));
    let computations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cached = Arc::clone(&cached);
        let computations = Arc::clone(&computations);
        handles.push(tokio::spawn(async move {
            cached
                .get_or_compute(&[json!("2026-08-24")], || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Some(json!({"total": 1234})))
                })
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Some(json!({"total": 1234})));
    }
    assert_eq!(computations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn write_then_invalidate_then_recompute() {
    let manager = manager();
    let cached: Cached<Vec<u64>, std::convert::Infallible> = Cached::new(
        Arc::clone(&manager),
        CachedOptions::list("books.list").namespace("books"),
    );
    let filters = vec![("genre".to_string(), json!("scifi"))];

    let first = cached
        .get_or_compute_list(&filters, || async { Ok(Some(vec![1, 2, 3])) })
        .await
        .unwrap();
    assert_eq!(first, Some(vec![1, 2, 3]));

    // Mutation succeeds, namespace is bumped, the listing recomputes.
    invalidate_after::<_, std::convert::Infallible, _, _>(
        &manager,
        &InvalidationRules::new().namespace("books"),
        || async { Ok(()) },
    )
    .await
    .unwrap();

    let second = cached
        .get_or_compute_list(&filters, || async { Ok(Some(vec![1, 2, 3, 4])) })
        .await
        .unwrap();
    assert_eq!(second, Some(vec![1, 2, 3, 4]));
}

/// Store double whose every operation fails, for fail-open coverage.
struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _: &str) -> readshelf_cache::Result<Option<Vec<u8>>> {
        Err(CacheError::backend("connection refused"))
    }
    async fn set(&self, _: &str, _: &[u8], _: Duration) -> readshelf_cache::Result<()> {
        Err(CacheError::backend("connection refused"))
    }
    async fn set_nx(&self, _: &str, _: &[u8]) -> readshelf_cache::Result<bool> {
        Err(CacheError::backend("connection refused"))
    }
    async fn delete(&self, _: &[String]) -> readshelf_cache::Result<u64> {
        Err(CacheError::backend("connection refused"))
    }
    async fn scan(&self, _: &str) -> readshelf_cache::Result<Vec<String>> {
        Err(CacheError::backend("connection refused"))
    }
    async fn incr(&self, _: &str, _: i64) -> readshelf_cache::Result<i64> {
        Err(CacheError::backend("connection refused"))
    }
    async fn expire(&self, _: &str, _: Duration) -> readshelf_cache::Result<bool> {
        Err(CacheError::backend("connection refused"))
    }
    async fn sadd(&self, _: &str, _: &str) -> readshelf_cache::Result<()> {
        Err(CacheError::backend("connection refused"))
    }
    async fn smembers(&self, _: &str) -> readshelf_cache::Result<Vec<String>> {
        Err(CacheError::backend("connection refused"))
    }
    async fn srem(&self, _: &str, _: &[String]) -> readshelf_cache::Result<u64> {
        Err(CacheError::backend("connection refused"))
    }
    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn backend_outage_degrades_to_misses() {
    let config = CacheConfig {
        key_prefix: "it".into(),
        ..CacheConfig::default()
    };
    let manager = Arc::new(CacheManager::new(Arc::new(FailingStore), &config));

    assert_eq!(manager.get("k", Some("books")).await, None);
    assert!(!manager.set("k", &json!(1), &SetOptions::new()).await);
    assert!(!manager.delete("k", None).await);
    assert!(!manager.exists("k", None).await);
    assert_eq!(manager.increment("k", None, 1).await, None);
    assert_eq!(manager.invalidate_namespace("books").await, None);
    assert_eq!(manager.invalidate_by_tags(&["t".into()]).await, 0);
    assert_eq!(manager.clear_pattern("books:*", None).await, 0);
    assert!(manager.stats().await.is_err());
}

#[tokio::test]
async fn backend_outage_still_computes_through_cached() {
    let config = CacheConfig {
        key_prefix: "it".into(),
        ..CacheConfig::default()
    };
    let manager = Arc::new(CacheManager::new(Arc::new(FailingStore), &config));
    let cached: Cached<String, std::convert::Infallible> =
        Cached::new(manager, CachedOptions::new("books.title"));

    // The computation runs and its result flows back even though nothing
    // can be read from or written to the store.
    let calls = AtomicUsize::new(0);
    for _ in 0..2 {
        let result = cached
            .get_or_compute(&[json!(7)], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some("Dune".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("Dune"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn immediate_cleanup_combines_strategies() {
    let manager = manager();
    manager
        .set(
            "a",
            &json!(1),
            &SetOptions::new().namespace("books").tags(["featured"]),
        )
        .await;
    manager
        .set("session:1", &json!("s"), &SetOptions::new())
        .await;

    let version = manager.invalidate_namespace("books").await.unwrap();
    assert!(version > 1);
    let by_pattern = manager.clear_pattern("global:session:*", None).await;
    assert_eq!(by_pattern, 1);
    let by_tags = manager.invalidate_by_tags(&["featured".into()]).await;
    assert_eq!(by_tags, 1);
}
