//! Recognition memoization keyed by audio content.

use super::SpeechRecognizer;
use crate::cache::{CacheNamespace, CacheValue, SharedCache};
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::Utterance;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Caches transcripts by the blake3 digest of the utterance audio.
///
/// Empty transcripts are cached too; errors are not.
pub struct MemoizedRecognizer {
    inner: Arc<dyn SpeechRecognizer>,
    cache: SharedCache,
    ttl: Duration,
}

impl MemoizedRecognizer {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn SpeechRecognizer>, cache: SharedCache, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// Cache key for `utterance`.
    pub fn key(utterance: &Utterance) -> String {
        blake3::hash(&utterance.pcm).to_hex().to_string()
    }
}

#[async_trait]
impl SpeechRecognizer for MemoizedRecognizer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn recognize(&self, utterance: &Utterance) -> Result<String> {
        let key = Self::key(utterance);
        let value = self
            .cache
            .get_or_try_insert_with(CacheNamespace::Stt, &key, self.ttl, || async {
                self.inner.recognize(utterance).await.map(CacheValue::Text)
            })
            .await?;
        value
            .into_text()
            .ok_or_else(|| HuddleError::Stt(format!("cache entry {key} is not text")))
    }
}
