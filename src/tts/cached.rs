//! Synthesis cache keyed by `(call, text)`.

use super::SpeechSynthesizer;
use crate::cache::{CacheNamespace, CacheValue, SharedCache};
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::CallId;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a synthesizer with the shared cache's `tts` namespace.
///
/// The namespace's entry cap is configured on the cache itself.
#[derive(Clone)]
pub struct CachedSynthesizer {
    inner: Arc<dyn SpeechSynthesizer>,
    cache: SharedCache,
    ttl: Duration,
}

impl CachedSynthesizer {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn SpeechSynthesizer>, cache: SharedCache, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// Cache key for `text` spoken in `call`.
    pub fn key(call: &CallId, text: &str) -> String {
        format!("{call}:{}", blake3::hash(text.as_bytes()).to_hex())
    }

    /// Synthesize `text` for `call`, reusing a cached clip when present.
    ///
    /// # Errors
    ///
    /// Returns the inner synthesizer's error on a miss that fails.
    pub async fn synthesize(&self, call: &CallId, text: &str) -> Result<Bytes> {
        let key = Self::key(call, text);
        let value = self
            .cache
            .get_or_try_insert_with(CacheNamespace::Tts, &key, self.ttl, || async {
                self.inner.synthesize(text).await.map(CacheValue::Audio)
            })
            .await?;
        value
            .into_audio()
            .ok_or_else(|| HuddleError::Tts(format!("cache entry {key} is not audio")))
    }
}
