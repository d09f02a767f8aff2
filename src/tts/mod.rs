//! Text-to-speech collaborators.

pub mod cached;
pub mod command;

pub use cached::CachedSynthesizer;
pub use command::CommandSynthesizer;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Turns reply text into encoded audio the sink can play.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`. Never returns empty audio on success.
    async fn synthesize(&self, text: &str) -> Result<Bytes>;
}
