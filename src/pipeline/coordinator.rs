//! Top-level owner of every joined call.
//!
//! The coordinator holds the shared collaborators (recognizer, agent,
//! synthesizer, resolver), the resolution cache and its sweeper, the runtime
//! event bus and the [`CallRegistry`]. Control operations take a call id and
//! route to that call's tasks; nothing here is global state.

use crate::agent::{CommandAgent, ConversationAgent};
use crate::audio::TransportFormat;
use crate::cache::{CacheNamespace, ResolutionCache, SharedCache};
use crate::channels::TextChannel;
use crate::config::HuddleConfig;
use crate::error::{HuddleError, Result};
use crate::pipeline::gate::{GateContext, spawn_gate};
use crate::pipeline::messages::{CallId, PcmFrame, UserId, VoiceInput};
use crate::pipeline::registry::{CallRegistry, CallSession};
use crate::pipeline::reply::ReplyPath;
use crate::pipeline::segmenter::SpeakerSegmenter;
use crate::pipeline::voice::{CallFlags, VoiceStage, spawn_voice_stage};
use crate::playback::{
    AudioSink, NowPlaying, PlayOutcome, PlaybackScheduler, QueueSnapshot, SinkEvent,
    spawn_playback,
};
use crate::runtime::{EventBus, RuntimeEvent};
use crate::stt::{SpeechRecognizer, build_recognizer};
use crate::tts::{CachedSynthesizer, CommandSynthesizer, SpeechSynthesizer};
use bytes::Bytes;
use huddle_media::{MediaResolver, YtDlpResolver};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External services a coordinator talks to.
pub struct Collaborators {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub agent: Arc<dyn ConversationAgent>,
    /// `None` disables spoken replies.
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub resolver: Arc<dyn MediaResolver>,
}

impl Collaborators {
    /// Build the configured backends. The recognizer memoizes into `cache`.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] when a backend is misconfigured.
    pub fn from_config(config: &HuddleConfig, cache: &SharedCache) -> Result<Self> {
        let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = if config.tts.enabled {
            Some(Arc::new(CommandSynthesizer::new(&config.tts)?))
        } else {
            None
        };
        Ok(Self {
            recognizer: build_recognizer(config, Arc::clone(cache))?,
            agent: Arc::new(CommandAgent::new(&config.agent)?),
            synthesizer,
            resolver: Arc::new(YtDlpResolver::new(config.media.clone())?),
        })
    }
}

/// Create the shared cache with the configured synthesis cap.
pub fn shared_cache(config: &HuddleConfig) -> SharedCache {
    Arc::new(
        ResolutionCache::new()
            .with_capacity_limit(CacheNamespace::Tts, config.cache.tts_max_entries),
    )
}

/// Owns the call registry and shared services.
pub struct Coordinator {
    config: Arc<HuddleConfig>,
    cache: SharedCache,
    collaborators: Collaborators,
    registry: CallRegistry,
    events: EventBus,
    cancel: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Coordinator {
    /// Create a coordinator and start the cache sweeper.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] if `config` is invalid.
    pub fn new(
        config: HuddleConfig,
        cache: SharedCache,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let sweeper = cache.spawn_sweeper(
            Duration::from_secs(config.cache.sweep_interval_secs),
            cancel.child_token(),
        );
        Ok(Self {
            config: Arc::new(config),
            cache,
            collaborators,
            registry: CallRegistry::new(),
            events: EventBus::default(),
            cancel,
            sweeper,
        })
    }

    /// Create a coordinator with the backends named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] if `config` or a backend is invalid.
    pub fn from_config(config: HuddleConfig) -> Result<Self> {
        let cache = shared_cache(&config);
        let collaborators = Collaborators::from_config(&config, &cache)?;
        Self::new(config, cache, collaborators)
    }

    pub fn config(&self) -> &HuddleConfig {
        &self.config
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Ids of joined calls, sorted.
    pub fn calls(&self) -> Vec<CallId> {
        self.registry.calls()
    }

    pub fn is_joined(&self, call: &CallId) -> bool {
        self.registry.contains(call)
    }

    /// Join `call`, wiring its voice, gate and playback tasks to `sink`
    /// and the optional companion `text_channel`.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] if the call is already joined.
    pub fn join(
        &self,
        call: CallId,
        text_channel: Option<Arc<dyn TextChannel>>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<()> {
        if self.registry.contains(&call) {
            return Err(HuddleError::Rejected(format!("already joined call {call}")));
        }
        let config = &self.config;
        let segmenter = SpeakerSegmenter::with_energy_vad(call.clone(), &config.vad, &config.audio)?;
        let cancel = self.cancel.child_token();
        let mut tasks = Vec::with_capacity(3);

        let scheduler = PlaybackScheduler::new(
            call.clone(),
            config,
            Arc::clone(&self.collaborators.resolver),
            Arc::clone(&self.cache),
            sink,
            self.events.clone(),
        );
        let (playback, playback_task) = spawn_playback(scheduler, cancel.clone());
        tasks.push(playback_task);

        let reply = ReplyPath {
            call: call.clone(),
            synthesizer: self.collaborators.synthesizer.as_ref().map(|s| {
                CachedSynthesizer::new(
                    Arc::clone(s),
                    Arc::clone(&self.cache),
                    Duration::from_secs(config.cache.tts_ttl_secs),
                )
            }),
            synth_timeout: Duration::from_secs(config.tts.timeout_secs),
            playback: playback.clone(),
            channel: text_channel.clone(),
            post_to_channel: config.gate.post_to_channel,
            events: self.events.clone(),
        };

        let (gate, gate_task) = spawn_gate(
            GateContext {
                call: call.clone(),
                config: config.gate.clone(),
                agent: Arc::clone(&self.collaborators.agent),
                agent_timeout: Duration::from_secs(config.agent.timeout_secs),
                primer: config.agent.primer.clone(),
                reply: reply.clone(),
                events: self.events.clone(),
            },
            cancel.clone(),
        );
        tasks.push(gate_task);

        let flags = Arc::new(CallFlags::new(
            config.gate.listen_on_join,
            config.recording.record_on_join,
        ));
        let (voice_tx, voice_rx) = mpsc::channel(config.audio.frame_queue_capacity);
        let stage = VoiceStage {
            call: call.clone(),
            segmenter,
            recognizer: Arc::clone(&self.collaborators.recognizer),
            gate: gate.clone(),
            flags: Arc::clone(&flags),
            format: TransportFormat::from(&config.audio),
            recording_dir: config.recording.dir.clone(),
            events: self.events.clone(),
        };
        tasks.push(spawn_voice_stage(stage, voice_rx, cancel.clone()));

        let session = Arc::new(CallSession::new(
            call.clone(),
            text_channel.map(|c| c.id().to_owned()),
            flags,
            voice_tx,
            gate,
            playback,
            reply,
            cancel.clone(),
        ));
        for task in tasks {
            session.adopt(task);
        }
        if let Err(e) = self.registry.insert(session) {
            cancel.cancel();
            return Err(e);
        }

        info!(%call, "joined call");
        self.events.emit(RuntimeEvent::CallJoined { call });
        Ok(())
    }

    /// Leave `call`, stopping playback and all of its tasks.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] if the call is not joined.
    pub async fn leave(&self, call: &CallId) -> Result<()> {
        let session = self
            .registry
            .remove(call)
            .ok_or_else(|| HuddleError::Rejected(format!("not in call {call}")))?;
        session.shutdown().await;
        info!(%call, "left call");
        self.events.emit(RuntimeEvent::CallLeft { call: call.clone() });
        Ok(())
    }

    /// Leave every call and stop the cache sweeper.
    pub async fn shutdown(&self) {
        for session in self.registry.drain() {
            session.shutdown().await;
            self.events.emit(RuntimeEvent::CallLeft {
                call: session.call.clone(),
            });
        }
        self.cancel.cancel();
        self.sweeper.abort();
        debug!("coordinator shut down");
    }

    /// Deliver one transport frame.
    ///
    /// Frames are dropped (with a warning) when the call's frame queue is
    /// full rather than stalling the transport.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] for unknown calls and
    /// [`HuddleError::Channel`] if the voice task is gone.
    pub fn on_frame(&self, call: &CallId, user: UserId, data: Bytes) -> Result<()> {
        let session = self.registry.get(call)?;
        let frame = PcmFrame {
            user,
            data,
            received_at: tokio::time::Instant::now(),
        };
        match session.voice_tx.try_send(VoiceInput::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%call, "voice queue full, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(HuddleError::Channel(format!("voice task of {call} stopped")))
            }
        }
    }

    /// Deliver a speaking start/end signal. Waits for queue space so end
    /// signals are never lost.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] for unknown calls and
    /// [`HuddleError::Channel`] if the voice task is gone.
    pub async fn on_speaking(&self, call: &CallId, user: UserId, speaking: bool) -> Result<()> {
        let session = self.registry.get(call)?;
        session
            .voice_tx
            .send(VoiceInput::Speaking { user, speaking })
            .await
            .map_err(|_| HuddleError::Channel(format!("voice task of {call} stopped")))
    }

    /// Forget a speaker who left the call, discarding any partial speech.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] for unknown calls and
    /// [`HuddleError::Channel`] if the voice task is gone.
    pub async fn on_speaker_left(&self, call: &CallId, user: UserId) -> Result<()> {
        let session = self.registry.get(call)?;
        session
            .voice_tx
            .send(VoiceInput::SpeakerLeft(user))
            .await
            .map_err(|_| HuddleError::Channel(format!("voice task of {call} stopped")))
    }

    /// Route a transport notification about a source started on the sink.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] for unknown calls.
    pub async fn on_sink_event(&self, call: &CallId, event: SinkEvent) -> Result<()> {
        self.registry.get(call)?.playback.sink_event(event).await
    }

    /// Play or queue `query`; radio-style queries start radio mode.
    ///
    /// # Errors
    ///
    /// Unknown call, full queue, lookup failure or sink refusal.
    pub async fn enqueue_or_play(
        &self,
        call: &CallId,
        query: &str,
        requester: Option<UserId>,
    ) -> Result<PlayOutcome> {
        self.registry
            .get(call)?
            .playback
            .enqueue_or_play(query, requester)
            .await
    }

    /// Skip the current track. Returns the track now playing, if any.
    ///
    /// # Errors
    ///
    /// Unknown call or nothing playing.
    pub async fn skip(&self, call: &CallId) -> Result<Option<NowPlaying>> {
        self.registry.get(call)?.playback.skip().await
    }

    /// Stop playback and clear the queue and radio mode.
    ///
    /// # Errors
    ///
    /// Unknown call.
    pub async fn stop(&self, call: &CallId) -> Result<usize> {
        self.registry.get(call)?.playback.stop().await
    }

    /// # Errors
    ///
    /// Unknown call.
    pub async fn queue_snapshot(&self, call: &CallId) -> Result<QueueSnapshot> {
        self.registry.get(call)?.playback.snapshot().await
    }

    /// # Errors
    ///
    /// Unknown call.
    pub async fn now_playing(&self, call: &CallId) -> Result<Option<NowPlaying>> {
        self.registry.get(call)?.playback.now_playing().await
    }

    /// Toggle recognition of the call's speech.
    ///
    /// # Errors
    ///
    /// Unknown call.
    pub fn set_listening(&self, call: &CallId, enabled: bool) -> Result<()> {
        let session = self.registry.get(call)?;
        session.flags.listening.store(enabled, Ordering::Relaxed);
        info!(%call, enabled, "listening changed");
        Ok(())
    }

    /// Toggle writing utterances to disk.
    ///
    /// # Errors
    ///
    /// Unknown call.
    pub fn set_recording(&self, call: &CallId, enabled: bool) -> Result<()> {
        let session = self.registry.get(call)?;
        session.flags.recording.store(enabled, Ordering::Relaxed);
        info!(%call, enabled, "recording changed");
        Ok(())
    }

    /// # Errors
    ///
    /// Unknown call.
    pub async fn set_always_respond(&self, call: &CallId, enabled: bool) -> Result<()> {
        self.registry.get(call)?.gate.set_always_respond(enabled).await
    }

    /// Reset the call's agent session so the next turn starts fresh.
    ///
    /// # Errors
    ///
    /// Unknown call or agent reset failure.
    pub async fn reset_session(&self, call: &CallId) -> Result<()> {
        self.registry.get(call)?.gate.reset_session().await
    }

    /// Speak `text` into the call directly, bypassing the agent.
    ///
    /// # Errors
    ///
    /// Unknown call, speech output disabled, or synthesis/playback failure.
    pub async fn say(&self, call: &CallId, text: &str) -> Result<()> {
        let session = self.registry.get(call)?;
        if session.reply.synthesizer.is_none() {
            return Err(HuddleError::Tts("speech output is disabled".into()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(HuddleError::Tts("nothing to say".into()));
        }
        session.reply.speak(text).await
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
