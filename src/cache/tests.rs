use super::*;
use crate::config::CacheConfig;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{advance, Duration};

fn test_cache() -> ViewportCache {
    ViewportCache::new(
        CacheConfig {
            ttl_ms: 30_000,
            stale_window_ms: 120_000,
            min_refetch_interval_ms: 10_000,
        },
        MetricsTracker::new(),
    )
}

/// Fetch closure that counts invocations and returns a numbered payload.
fn counted_fetch(
    counter: Arc<AtomicU64>,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + 'static {
    move || {
        Box::pin(async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({"fetch": n}))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_hit_returns_identical_payload() {
    let cache = test_cache();
    let counter = Arc::new(AtomicU64::new(0));

    let first = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(!first.cached);
    assert_eq!(first.data, json!({"fetch": 1}));

    // Immediately after a successful fetch with a 30s TTL: HIT
    let second = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.data, first.data);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_serves_old_payload_and_refreshes_once() {
    let cache = test_cache();
    let counter = Arc::new(AtomicU64::new(0));

    cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();

    // Past the TTL, inside the stale window
    advance(Duration::from_secs(40)).await;

    let stale = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(stale.cached, "stale entry is served from cache");
    assert_eq!(stale.data, json!({"fetch": 1}), "caller sees the old payload");

    // A second stale read before the refresh lands must not spawn another
    let stale_again = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert_eq!(stale_again.data, json!({"fetch": 1}));

    // Let the background refresh complete
    advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    assert_eq!(counter.load(Ordering::SeqCst), 2, "exactly one refresh ran");

    let refreshed = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(refreshed.cached);
    assert_eq!(refreshed.data, json!({"fetch": 2}));
}

#[tokio::test(start_paused = true)]
async fn test_miss_past_stale_window_fetches_synchronously() {
    let cache = test_cache();
    let counter = Arc::new(AtomicU64::new(0));

    cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();

    // Past TTL + stale window, and past the refetch interval
    advance(Duration::from_secs(200)).await;

    let fresh = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(!fresh.cached);
    assert_eq!(fresh.data, json!({"fetch": 2}));
}

#[tokio::test(start_paused = true)]
async fn test_min_refetch_interval_suppresses_sibling_refresh() {
    let cache = test_cache();
    let counter = Arc::new(AtomicU64::new(0));

    // Two keys for the same source, populated together
    cache
        .get_or_fetch("src", "kA", counted_fetch(counter.clone()))
        .await
        .unwrap();
    cache
        .get_or_fetch("src", "kB", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    advance(Duration::from_secs(40)).await;

    // First stale read claims the source budget and refreshes
    cache
        .get_or_fetch("src", "kA", counted_fetch(counter.clone()))
        .await
        .unwrap();
    // Sibling key goes stale inside the interval: served stale, no refresh
    let sibling = cache
        .get_or_fetch("src", "kB", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(sibling.cached);

    advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        counter.load(Ordering::SeqCst),
        3,
        "only kA refreshed inside the interval"
    );
}

#[tokio::test(start_paused = true)]
async fn test_cold_key_fetch_restarts_refetch_interval() {
    // Short TTL so entries go stale well inside the 10s refetch interval
    let cache = ViewportCache::new(
        CacheConfig {
            ttl_ms: 2_000,
            stale_window_ms: 120_000,
            min_refetch_interval_ms: 10_000,
        },
        MetricsTracker::new(),
    );
    let counter = Arc::new(AtomicU64::new(0));

    cache
        .get_or_fetch("src", "kA", counted_fetch(counter.clone()))
        .await
        .unwrap();

    // A cold key inside the interval must still fetch, and that fetch
    // restarts the source's interval
    advance(Duration::from_secs(5)).await;
    let cold = cache
        .get_or_fetch("src", "kB", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(!cold.cached);
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    // 12s after kA's fetch but only 7s after kB's: the budget measured from
    // the cold fetch is still exhausted, so kA's stale read spawns nothing
    advance(Duration::from_secs(7)).await;
    let stale = cache
        .get_or_fetch("src", "kA", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(stale.cached);

    advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        counter.load(Ordering::SeqCst),
        2,
        "no refresh inside the restarted interval"
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_coalesce_into_one_fetch() {
    let cache = Arc::new(test_cache());
    let counter = Arc::new(AtomicU64::new(0));

    let slow_counter = counter.clone();
    let slow = move || {
        Box::pin(async move {
            slow_counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(json!({"payload": "shared"}))
        }) as std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>>
    };

    let (a, b) = tokio::join!(
        cache.get_or_fetch("src", "k1", slow),
        cache.get_or_fetch("src", "k1", counted_fetch(counter.clone())),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1, "one upstream fetch total");
    assert_eq!(a.data, json!({"payload": "shared"}));
    assert_eq!(b.data, a.data);
    // Exactly one of the two performed the fetch
    assert_ne!(a.cached, b.cached);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_degrades_to_expired_entry() {
    let cache = test_cache();
    let counter = Arc::new(AtomicU64::new(0));

    cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();

    advance(Duration::from_secs(200)).await;

    let outcome = cache
        .get_or_fetch("src", "k1", || {
            Box::pin(async { anyhow::bail!("upstream 503") })
                as std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        })
        .await
        .unwrap();
    assert!(outcome.cached, "expired entry beats a hard failure");
    assert_eq!(outcome.data, json!({"fetch": 1}));
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_with_empty_cache_is_an_error() {
    let cache = test_cache();
    let result = cache
        .get_or_fetch("src", "k1", || {
            Box::pin(async { anyhow::bail!("upstream timeout") })
                as std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        })
        .await;
    assert!(result.is_err());

    // The failure must not wedge the in-flight slot
    let counter = Arc::new(AtomicU64::new(0));
    advance(Duration::from_secs(11)).await;
    let recovered = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(!recovered.cached);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_refetch() {
    let cache = test_cache();
    let counter = Arc::new(AtomicU64::new(0));

    cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    cache.invalidate("k1");

    advance(Duration::from_secs(11)).await;
    let outcome = cache
        .get_or_fetch("src", "k1", counted_fetch(counter.clone()))
        .await
        .unwrap();
    assert!(!outcome.cached);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_make_key_is_stable_concatenation() {
    let key = ViewportCache::make_key(
        "opensky",
        &[
            ("n", "40.0000".to_string()),
            ("s", "39.0000".to_string()),
            ("limit", "500".to_string()),
        ],
    );
    assert_eq!(key, "opensky|n=40.0000|s=39.0000|limit=500");
    // Identical inputs, identical key
    let again = ViewportCache::make_key(
        "opensky",
        &[
            ("n", "40.0000".to_string()),
            ("s", "39.0000".to_string()),
            ("limit", "500".to_string()),
        ],
    );
    assert_eq!(key, again);
}
