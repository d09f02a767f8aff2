//! TTL cache shared by stream resolution, search, speech synthesis and
//! recognition memoization.
//!
//! Keys are namespaced by purpose. A read past expiry is a miss and evicts
//! the entry; a background sweeper evicts expired entries on a fixed period
//! so keys that are never re-read do not accumulate. Namespaces may carry an
//! entry cap, enforced by evicting the oldest insertion.
//!
//! Expiry uses [`tokio::time::Instant`] so tests can drive it with a paused
//! clock.

use bytes::Bytes;
use dashmap::DashMap;
use huddle_media::TrackInfo;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Purpose of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Playable stream URL for a source URL.
    Resolve,
    /// Search results for a query.
    Search,
    /// Synthesized speech for `(call, text)`.
    Tts,
    /// Recognized text for an audio digest.
    Stt,
}

impl CacheNamespace {
    /// Short lowercase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Search => "search",
            Self::Tts => "tts",
            Self::Stt => "stt",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Values stored by the shared cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// A URL or transcript.
    Text(String),
    /// Search results.
    Tracks(Vec<TrackInfo>),
    /// Encoded audio.
    Audio(Bytes),
}

impl CacheValue {
    /// The text payload, if this is [`CacheValue::Text`].
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The tracks payload, if this is [`CacheValue::Tracks`].
    pub fn into_tracks(self) -> Option<Vec<TrackInfo>> {
        match self {
            Self::Tracks(t) => Some(t),
            _ => None,
        }
    }

    /// The audio payload, if this is [`CacheValue::Audio`].
    pub fn into_audio(self) -> Option<Bytes> {
        match self {
            Self::Audio(b) => Some(b),
            _ => None,
        }
    }
}

type Key = (CacheNamespace, String);

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

/// Insertion order and live size of a capped namespace.
///
/// `order` may hold stale records for keys that were overwritten or removed;
/// a record only counts when its sequence number still matches the entry.
#[derive(Debug)]
struct CapState {
    cap: usize,
    live: usize,
    order: VecDeque<(String, u64)>,
}

/// Concurrent TTL cache with per-key single-flight population.
pub struct ResolutionCache<V> {
    entries: DashMap<Key, Entry<V>>,
    inflight: DashMap<Key, Arc<tokio::sync::Mutex<()>>>,
    caps: HashMap<CacheNamespace, Mutex<CapState>>,
    next_seq: AtomicU64,
}

/// The cache instance shared across calls.
pub type SharedCache = Arc<ResolutionCache<CacheValue>>;

impl<V> Default for ResolutionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ResolutionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an uncapped cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            caps: HashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Limit `namespace` to `max_entries`, evicting oldest insertions first.
    pub fn with_capacity_limit(mut self, namespace: CacheNamespace, max_entries: usize) -> Self {
        self.caps.insert(
            namespace,
            Mutex::new(CapState {
                cap: max_entries,
                live: 0,
                order: VecDeque::new(),
            }),
        );
        self
    }

    /// Return the live value for `key`, evicting it if expired.
    pub fn get(&self, namespace: CacheNamespace, key: &str) -> Option<V> {
        let k = (namespace, key.to_owned());
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&k) {
            if now < entry.expires_at {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // Expired: the read guard is gone, re-check before removing so a
        // concurrent fresh put is not lost.
        if self.entries.remove_if(&k, |_, e| now >= e.expires_at).is_some() {
            self.note_removed(namespace, 1);
        }
        None
    }

    /// Insert or overwrite `key` with a fresh expiry of `now + ttl`.
    pub fn put(&self, namespace: CacheNamespace, key: &str, value: V, ttl: Duration) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let previous = self.entries.insert(
            (namespace, key.to_owned()),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                seq,
            },
        );
        if let Some(state) = self.caps.get(&namespace) {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if previous.is_none() {
                state.live += 1;
            }
            state.order.push_back((key.to_owned(), seq));
            self.evict_oldest(namespace, &mut state);
        }
    }

    /// Pop insertion records until the namespace is back under its cap.
    fn evict_oldest(&self, namespace: CacheNamespace, state: &mut CapState) {
        while state.live > state.cap {
            let Some((key, seq)) = state.order.pop_front() else {
                break;
            };
            if self
                .entries
                .remove_if(&(namespace, key.clone()), |_, e| e.seq == seq)
                .is_some()
            {
                state.live -= 1;
                debug!(namespace = %namespace, key = %key, "evicting oldest cache entry");
            }
        }
        // Overwrites leave stale records behind; drop them once they dominate.
        if state.order.len() > state.cap.saturating_mul(2).max(16) {
            state.order.retain(|(key, seq)| {
                self.entries
                    .get(&(namespace, key.clone()))
                    .is_some_and(|e| e.seq == *seq)
            });
        }
    }

    fn note_removed(&self, namespace: CacheNamespace, removed: usize) {
        if let Some(state) = self.caps.get(&namespace) {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.live = state.live.saturating_sub(removed);
        }
    }

    /// Remove `key` regardless of expiry.
    pub fn invalidate(&self, namespace: CacheNamespace, key: &str) -> bool {
        let removed = self.entries.remove(&(namespace, key.to_owned())).is_some();
        if removed {
            self.note_removed(namespace, 1);
        }
        removed
    }

    /// Evict every expired entry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed: HashMap<CacheNamespace, usize> = HashMap::new();
        self.entries.retain(|(namespace, _), e| {
            let live = now < e.expires_at;
            if !live {
                *removed.entry(*namespace).or_default() += 1;
            }
            live
        });
        for (namespace, count) in &removed {
            self.note_removed(*namespace, *count);
        }
        removed.values().sum()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored entries in `namespace`.
    pub fn len_in(&self, namespace: CacheNamespace) -> usize {
        self.entries
            .iter()
            .filter(|item| item.key().0 == namespace)
            .count()
    }

    /// Return the cached value or run `init` to produce it.
    ///
    /// Concurrent callers missing on the same key wait for a single `init`
    /// instead of each calling out. Errors are not cached; the next waiter
    /// retries.
    ///
    /// # Errors
    ///
    /// Returns whatever `init` returns on failure.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        ttl: Duration,
        init: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(v) = self.get(namespace, key) {
            return Ok(v);
        }

        let k = (namespace, key.to_owned());
        let lock = self
            .inflight
            .entry(k.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            match self.get(namespace, key) {
                Some(v) => Ok(v),
                None => {
                    let produced = init().await;
                    if let Ok(v) = &produced {
                        self.put(namespace, key, v.clone(), ttl);
                    }
                    produced
                }
            }
        };

        // Map + this handle: nobody else is waiting on the key.
        self.inflight.remove_if(&k, |_, l| Arc::strong_count(l) <= 2);
        result
    }

    /// Spawn the periodic sweeper. It stops when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "cache sweep");
                        }
                    }
                }
            }
        })
    }
}
