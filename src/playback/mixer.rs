//! Music/speech arbitration on a call's single outbound sink.
//!
//! At most one music source and one speech clip are tracked. Starting speech
//! ducks or pauses the music; when the clip ends (or its auto-stop deadline
//! passes) the music is restored. The music source itself is never stopped
//! for speech, so its position survives.

use super::sink::{AudioSink, TrackHandle};
use crate::config::{MixMode, MixerConfig};
use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sink arbiter owned by the playback actor.
pub struct Mixer {
    sink: Arc<dyn AudioSink>,
    config: MixerConfig,
    music: Option<TrackHandle>,
    speech: Option<TrackHandle>,
    yielded: bool,
}

impl Mixer {
    /// Create a mixer over `sink`.
    pub fn new(sink: Arc<dyn AudioSink>, config: MixerConfig) -> Self {
        Self {
            sink,
            config,
            music: None,
            speech: None,
            yielded: false,
        }
    }

    /// Active music handle.
    pub fn music(&self) -> Option<TrackHandle> {
        self.music
    }

    /// Active speech handle.
    pub fn speech(&self) -> Option<TrackHandle> {
        self.speech
    }

    /// Whether music is currently ducked or paused for speech.
    pub fn is_music_yielded(&self) -> bool {
        self.yielded
    }

    /// Deadline after which a speech clip is force-stopped.
    pub fn speech_timeout(&self) -> Duration {
        Duration::from_secs(self.config.speech_timeout_secs)
    }

    /// Start streaming `url` as the call's music, replacing any previous
    /// music source.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the stream cannot be started.
    pub async fn start_music(&mut self, handle: TrackHandle, url: &str) -> Result<()> {
        self.stop_music().await;

        let under_speech = self.speech.is_some();
        let volume = if under_speech && self.config.mode == MixMode::Duck {
            self.config.duck_volume
        } else {
            self.config.music_volume
        };
        self.sink.play_stream(handle, url, volume).await?;
        self.music = Some(handle);

        if under_speech {
            match self.config.mode {
                MixMode::Duck => self.yielded = true,
                MixMode::Pause => self.yield_music().await,
            }
        }
        Ok(())
    }

    /// Stop the current music source, if any.
    pub async fn stop_music(&mut self) {
        if let Some(handle) = self.music.take() {
            if let Err(e) = self.sink.stop(handle).await {
                warn!(%handle, error = %e, "failed to stop music");
            }
        }
        self.yielded = false;
    }

    /// Forget music that ended on its own. Returns `false` for unknown handles.
    pub fn music_finished(&mut self, handle: TrackHandle) -> bool {
        if self.music != Some(handle) {
            return false;
        }
        self.music = None;
        self.yielded = false;
        true
    }

    /// Play a speech clip over (or instead of) the music.
    ///
    /// A clip already playing is cut off.
    ///
    /// # Errors
    ///
    /// Returns the sink's error; music is restored in that case.
    pub async fn start_speech(&mut self, audio: Bytes) -> Result<TrackHandle> {
        if let Some(previous) = self.speech.take() {
            debug!(%previous, "replacing speech clip");
            if let Err(e) = self.sink.stop(previous).await {
                warn!(handle = %previous, error = %e, "failed to stop speech clip");
            }
        }

        self.yield_music().await;
        let handle = TrackHandle::next();
        if let Err(e) = self.sink.play_clip(handle, audio).await {
            self.restore_music().await;
            return Err(e);
        }
        self.speech = Some(handle);
        Ok(handle)
    }

    /// Speech clip ended naturally. Returns `false` for unknown handles.
    pub async fn speech_finished(&mut self, handle: TrackHandle) -> bool {
        if self.speech != Some(handle) {
            return false;
        }
        self.speech = None;
        self.restore_music().await;
        true
    }

    /// Auto-stop deadline fired for `handle`. No-op if the clip already ended.
    pub async fn speech_timed_out(&mut self, handle: TrackHandle) -> bool {
        if self.speech != Some(handle) {
            return false;
        }
        warn!(%handle, "speech clip exceeded its deadline, stopping");
        if let Err(e) = self.sink.stop(handle).await {
            warn!(%handle, error = %e, "failed to stop speech clip");
        }
        self.speech = None;
        self.restore_music().await;
        true
    }

    async fn yield_music(&mut self) {
        if self.yielded {
            return;
        }
        let Some(handle) = self.music else {
            return;
        };
        let result = match self.config.mode {
            MixMode::Duck => self.sink.set_volume(handle, self.config.duck_volume).await,
            MixMode::Pause => self.sink.pause(handle).await,
        };
        if let Err(e) = result {
            warn!(%handle, error = %e, "failed to yield music to speech");
        }
        self.yielded = true;
    }

    async fn restore_music(&mut self) {
        if !self.yielded {
            return;
        }
        self.yielded = false;
        let Some(handle) = self.music else {
            return;
        };
        let result = match self.config.mode {
            MixMode::Duck => self.sink.set_volume(handle, self.config.music_volume).await,
            MixMode::Pause => self.sink.resume(handle).await,
        };
        if let Err(e) = result {
            warn!(%handle, error = %e, "failed to restore music");
        }
    }
}
