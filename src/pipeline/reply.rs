//! Output side of a turn: text channel mirror and spoken reply.

use crate::channels::TextChannel;
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::CallId;
use crate::playback::PlaybackHandle;
use crate::runtime::{EventBus, RuntimeEvent};
use crate::tts::CachedSynthesizer;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Everything needed to put a reply in front of a call.
#[derive(Clone)]
pub struct ReplyPath {
    pub call: CallId,
    /// `None` when speech output is disabled.
    pub synthesizer: Option<CachedSynthesizer>,
    pub synth_timeout: Duration,
    pub playback: PlaybackHandle,
    pub channel: Option<Arc<dyn TextChannel>>,
    pub post_to_channel: bool,
    pub events: EventBus,
}

impl ReplyPath {
    /// Mirror `text` to the text channel. Failures are logged only.
    pub async fn post(&self, text: &str) {
        if !self.post_to_channel {
            return;
        }
        let Some(channel) = &self.channel else {
            return;
        };
        if let Err(e) = channel.post(text).await {
            warn!(call = %self.call, channel = channel.id(), error = %e, "failed to post reply");
        }
    }

    /// Synthesize `text` and play it into the call.
    ///
    /// Does nothing when speech output is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Timeout`] when synthesis exceeds its deadline,
    /// or the synthesizer / playback error.
    pub async fn speak(&self, text: &str) -> Result<()> {
        let Some(synthesizer) = &self.synthesizer else {
            return Ok(());
        };
        let audio = tokio::time::timeout(self.synth_timeout, synthesizer.synthesize(&self.call, text))
            .await
            .map_err(|_| HuddleError::Timeout("speech synthesis".into()))??;
        self.playback.speak(audio).await?;
        self.events.emit(RuntimeEvent::ReplySpoken {
            call: self.call.clone(),
            chars: text.chars().count(),
        });
        Ok(())
    }
}
