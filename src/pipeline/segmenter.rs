//! Per-speaker utterance segmentation.
//!
//! Each speaker in a call is tracked independently: a rolling pre-roll
//! buffer, the transport's speaking flag, a consecutive-silence counter and
//! the accumulated speech. An utterance is finalized when the transport
//! signals end of speaking or when the silence run reaches the configured
//! threshold, provided at least one speech frame was accumulated.
//!
//! The segmenter is synchronous and owned by a single task per call; frames
//! for one speaker are therefore processed strictly in arrival order.

use crate::audio::pcm::decode_s16le;
use crate::config::{AudioConfig, VadConfig};
use crate::error::Result;
use crate::pipeline::messages::{CallId, PcmFrame, UserId, Utterance};
use crate::vad::{EnergyVad, VoiceActivity};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Builds a fresh classifier for each newly tracked speaker.
pub type VadFactory = Box<dyn Fn() -> Box<dyn VoiceActivity> + Send>;

/// Thresholds applied by the segmenter.
#[derive(Debug, Clone)]
pub struct SegmenterSettings {
    /// Consecutive non-speech frames that end an utterance.
    pub silence_frames: u32,
    /// Frames of context prepended when speech starts.
    pub pre_roll_frames: usize,
    /// Frames shorter than this many bytes are dropped.
    pub min_frame_bytes: usize,
}

impl SegmenterSettings {
    /// Build settings from config sections.
    pub fn from_config(vad: &VadConfig, audio: &AudioConfig) -> Self {
        Self {
            silence_frames: vad.silence_frames.max(1),
            pre_roll_frames: vad.pre_roll_frames,
            min_frame_bytes: audio.min_frame_bytes,
        }
    }
}

struct SpeakerState {
    vad: Box<dyn VoiceActivity>,
    rolling: VecDeque<Bytes>,
    speaking: bool,
    silence_count: u32,
    speech: BytesMut,
    speech_frames: u32,
}

impl SpeakerState {
    fn new(vad: Box<dyn VoiceActivity>) -> Self {
        Self {
            vad,
            rolling: VecDeque::new(),
            speaking: false,
            silence_count: 0,
            speech: BytesMut::new(),
            speech_frames: 0,
        }
    }

    fn remember(&mut self, frame: Bytes, cap: usize) {
        if cap == 0 {
            return;
        }
        if self.rolling.len() == cap {
            self.rolling.pop_front();
        }
        self.rolling.push_back(frame);
    }

    fn take_utterance(&mut self, call: &CallId, user: &UserId) -> Option<Utterance> {
        if self.speech_frames == 0 {
            return None;
        }
        let utterance = Utterance {
            call: call.clone(),
            user: user.clone(),
            pcm: self.speech.split().freeze(),
            speech_frames: self.speech_frames,
            finalized_at: Instant::now(),
        };
        self.speech_frames = 0;
        self.silence_count = 0;
        self.rolling.clear();
        self.vad.reset();
        Some(utterance)
    }
}

/// Segmenter for every speaker of one call.
pub struct SpeakerSegmenter {
    call: CallId,
    settings: SegmenterSettings,
    factory: VadFactory,
    probe: Box<dyn VoiceActivity>,
    speakers: HashMap<UserId, SpeakerState>,
}

impl SpeakerSegmenter {
    /// Create a segmenter using `factory` to build per-speaker classifiers.
    pub fn new(call: CallId, settings: SegmenterSettings, factory: VadFactory) -> Self {
        let probe = factory();
        Self {
            call,
            settings,
            factory,
            probe,
            speakers: HashMap::new(),
        }
    }

    /// Create a segmenter with energy VAD from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the VAD config is invalid.
    pub fn with_energy_vad(call: CallId, vad: &VadConfig, audio: &AudioConfig) -> Result<Self> {
        let detector = EnergyVad::new(vad)?;
        let factory: VadFactory =
            Box::new(move || -> Box<dyn VoiceActivity> { Box::new(detector.clone()) });
        Ok(Self::new(
            call,
            SegmenterSettings::from_config(vad, audio),
            factory,
        ))
    }

    /// Feed one transport frame. Returns an utterance when this frame
    /// completes a silence run after speech.
    pub fn on_frame(&mut self, frame: PcmFrame) -> Option<Utterance> {
        if frame.data.len() < self.settings.min_frame_bytes {
            debug!(call = %self.call, user = %frame.user, len = frame.data.len(), "dropping short frame");
            return None;
        }
        let samples = match decode_s16le(&frame.data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(call = %self.call, user = %frame.user, error = %e, "dropping undecodable frame");
                return None;
            }
        };

        if !self.speakers.contains_key(&frame.user) {
            if !self.probe.is_speech(&samples) {
                return None;
            }
            debug!(call = %self.call, user = %frame.user, "tracking new speaker");
            self.speakers
                .insert(frame.user.clone(), SpeakerState::new((self.factory)()));
        }

        let silence_frames = self.settings.silence_frames;
        let pre_roll = self.settings.pre_roll_frames;
        let state = self.speakers.get_mut(&frame.user)?;
        let is_speech = state.vad.is_speech(&samples);

        if is_speech {
            if state.speech_frames == 0 {
                state.speech.clear();
                for prior in state.rolling.drain(..) {
                    state.speech.extend_from_slice(&prior);
                }
            }
            state.speech.extend_from_slice(&frame.data);
            state.speech_frames += 1;
            state.silence_count = 0;
            None
        } else if state.speech_frames > 0 {
            state.speech.extend_from_slice(&frame.data);
            state.silence_count += 1;
            if state.silence_count >= silence_frames {
                debug!(call = %self.call, user = %frame.user, "silence run ended utterance");
                return state.take_utterance(&self.call, &frame.user);
            }
            None
        } else {
            state.remember(frame.data, pre_roll);
            None
        }
    }

    /// Apply a transport speaking signal. Returns an utterance when an
    /// end-of-speaking signal closes accumulated speech.
    pub fn on_speaking(&mut self, user: &UserId, speaking: bool) -> Option<Utterance> {
        if speaking {
            let factory = &self.factory;
            self.speakers
                .entry(user.clone())
                .or_insert_with(|| SpeakerState::new(factory()))
                .speaking = true;
            return None;
        }

        let state = self.speakers.get_mut(user)?;
        state.speaking = false;
        let utterance = state.take_utterance(&self.call, user);
        if utterance.is_some() {
            debug!(call = %self.call, user = %user, "speaking end finalized utterance");
        }
        utterance
    }

    /// Whether the transport currently reports `user` as speaking.
    pub fn is_speaking(&self, user: &UserId) -> bool {
        self.speakers.get(user).is_some_and(|s| s.speaking)
    }

    /// Number of speakers with tracked state.
    pub fn tracked_speakers(&self) -> usize {
        self.speakers.len()
    }

    /// Forget a speaker that left the call, discarding partial speech.
    pub fn remove_speaker(&mut self, user: &UserId) {
        self.speakers.remove(user);
    }

    /// Discard all per-speaker state.
    pub fn clear(&mut self) {
        self.speakers.clear();
    }
}
