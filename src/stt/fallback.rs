//! Priority-ordered recognizer chain.
//!
//! Engines are tried in order, each under its own deadline and all under
//! one deadline for the whole chain. The first non-empty transcript wins. If every engine answered but none heard
//! anything, the result is empty text; if every engine failed, the last
//! failure is returned so the caller can log it.

use super::SpeechRecognizer;
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::Utterance;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Ordered chain of recognizers.
pub struct FallbackRecognizer {
    engines: Vec<Arc<dyn SpeechRecognizer>>,
    timeout: Duration,
    total_timeout: Duration,
}

impl FallbackRecognizer {
    /// Create a chain. The first engine is tried first.
    ///
    /// Each engine gets at most `timeout`; the chain as a whole gets at
    /// most `total_timeout`.
    pub fn new(
        engines: Vec<Arc<dyn SpeechRecognizer>>,
        timeout: Duration,
        total_timeout: Duration,
    ) -> Self {
        Self {
            engines,
            timeout,
            total_timeout,
        }
    }

    /// Number of engines in the chain.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether the chain has no engines.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[async_trait]
impl SpeechRecognizer for FallbackRecognizer {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn recognize(&self, utterance: &Utterance) -> Result<String> {
        let mut last_error: Option<HuddleError> = None;
        let mut any_answer = false;
        let chain_deadline = Instant::now() + self.total_timeout;

        for engine in &self.engines {
            let now = Instant::now();
            if now >= chain_deadline {
                warn!(
                    engine = engine.name(),
                    total_ms = self.total_timeout.as_millis() as u64,
                    "recognizer chain out of time; skipping remaining engines"
                );
                if last_error.is_none() {
                    last_error = Some(HuddleError::Timeout(format!(
                        "recognizer chain after {}ms",
                        self.total_timeout.as_millis()
                    )));
                }
                break;
            }
            let deadline = chain_deadline.min(now + self.timeout);
            match tokio::time::timeout_at(deadline, engine.recognize(utterance)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    debug!(engine = engine.name(), call = %utterance.call, user = %utterance.user, "recognized");
                    return Ok(text);
                }
                Ok(Ok(_)) => {
                    any_answer = true;
                    debug!(engine = engine.name(), "empty transcript, trying next engine");
                }
                Ok(Err(e)) => {
                    warn!(engine = engine.name(), error = %e, "recognizer failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    let waited = deadline.saturating_duration_since(now);
                    warn!(engine = engine.name(), timeout_ms = waited.as_millis() as u64, "recognizer timed out");
                    last_error = Some(HuddleError::Timeout(format!(
                        "{} after {}ms",
                        engine.name(),
                        waited.as_millis()
                    )));
                }
            }
        }

        match last_error {
            Some(e) if !any_answer => Err(e),
            _ if any_answer => Ok(String::new()),
            _ => Err(HuddleError::Stt("no recognizer configured".into())),
        }
    }
}
