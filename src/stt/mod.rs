//! Speech-to-text collaborators.
//!
//! Recognition is external: the core hands each finalized [`Utterance`] to a
//! [`SpeechRecognizer`] and only consumes the returned text. Engines are
//! composed from config into a priority-ordered [`FallbackRecognizer`],
//! optionally wrapped in a [`MemoizedRecognizer`].

pub mod command;
pub mod fallback;
pub mod memo;
pub mod whisper_http;

pub use command::CommandRecognizer;
pub use fallback::FallbackRecognizer;
pub use memo::MemoizedRecognizer;
pub use whisper_http::WhisperHttpRecognizer;

use crate::audio::TransportFormat;
use crate::cache::SharedCache;
use crate::config::{HuddleConfig, SttBackendConfig};
use crate::error::Result;
use crate::pipeline::messages::Utterance;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Turns one utterance into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Recognize `utterance`. Empty text means "nothing intelligible" and is
    /// not an error.
    async fn recognize(&self, utterance: &Utterance) -> Result<String>;
}

/// Build the configured recognizer stack.
///
/// # Errors
///
/// Returns an error if an engine cannot be constructed.
pub fn build_recognizer(
    config: &HuddleConfig,
    cache: SharedCache,
) -> Result<Arc<dyn SpeechRecognizer>> {
    let format = TransportFormat::from(&config.audio);
    let mut engines: Vec<Arc<dyn SpeechRecognizer>> = Vec::with_capacity(config.stt.backends.len());
    for backend in &config.stt.backends {
        let engine: Arc<dyn SpeechRecognizer> = match backend {
            SttBackendConfig::WhisperHttp { base_url } => {
                Arc::new(WhisperHttpRecognizer::new(base_url, format)?)
            }
            SttBackendConfig::Command { program, args } => {
                Arc::new(CommandRecognizer::new(program, args.clone(), format))
            }
        };
        engines.push(engine);
    }

    let chain: Arc<dyn SpeechRecognizer> = Arc::new(FallbackRecognizer::new(
        engines,
        Duration::from_secs(config.stt.timeout_secs),
        Duration::from_secs(config.stt.total_timeout_secs),
    ));
    if config.stt.memoize {
        Ok(Arc::new(MemoizedRecognizer::new(
            chain,
            cache,
            Duration::from_secs(config.cache.stt_ttl_secs),
        )))
    } else {
        Ok(chain)
    }
}
