//! Resolution cache behaviour under a simulated clock.

use huddle::cache::{CacheNamespace, CacheValue, ResolutionCache};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn entry_expires_after_ttl() {
    let cache: ResolutionCache<String> = ResolutionCache::new();
    cache.put(CacheNamespace::Resolve, "k", "v".into(), Duration::from_secs(30));
    assert_eq!(cache.get(CacheNamespace::Resolve, "k").as_deref(), Some("v"));
    assert!(cache.get(CacheNamespace::Search, "k").is_none());

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(cache.get(CacheNamespace::Resolve, "k").is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.get(CacheNamespace::Resolve, "k").is_none());
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_resolution() {
    let cache: Arc<ResolutionCache<CacheValue>> = Arc::new(ResolutionCache::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let lookup = |cache: Arc<ResolutionCache<CacheValue>>, calls: Arc<AtomicUsize>| async move {
        cache
            .get_or_try_insert_with(
                CacheNamespace::Resolve,
                "https://youtu.be/x",
                Duration::from_secs(60),
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, std::io::Error>(CacheValue::Text("https://cdn/x".into()))
                },
            )
            .await
    };

    let (a, b) = tokio::join!(
        lookup(Arc::clone(&cache), Arc::clone(&calls)),
        lookup(Arc::clone(&cache), Arc::clone(&calls))
    );
    assert_eq!(a.unwrap().into_text().as_deref(), Some("https://cdn/x"));
    assert_eq!(b.unwrap().into_text().as_deref(), Some("https://cdn/x"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn sweeper_evicts_expired_entries() {
    let cache: Arc<ResolutionCache<String>> = Arc::new(ResolutionCache::new());
    let cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(Duration::from_secs(60), cancel.clone());

    cache.put(CacheNamespace::Tts, "short", "a".into(), Duration::from_secs(10));
    cache.put(CacheNamespace::Tts, "long", "b".into(), Duration::from_secs(600));
    assert_eq!(cache.len(), 2);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.len_in(CacheNamespace::Tts), 1);

    cancel.cancel();
    sweeper.await.unwrap();
}

#[tokio::test]
async fn capped_namespace_evicts_oldest_first() {
    let cache: ResolutionCache<String> =
        ResolutionCache::new().with_capacity_limit(CacheNamespace::Tts, 2);
    for key in ["a", "b", "c"] {
        cache.put(CacheNamespace::Tts, key, key.into(), Duration::from_secs(60));
    }
    assert!(cache.get(CacheNamespace::Tts, "a").is_none());
    assert!(cache.get(CacheNamespace::Tts, "b").is_some());
    assert!(cache.get(CacheNamespace::Tts, "c").is_some());
}
