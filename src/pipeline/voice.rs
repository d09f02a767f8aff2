//! Voice stage of a call: segmentation, recording and recognition.
//!
//! Frames and speaking signals arrive on one channel in transport order and
//! are segmented by a single task. Each finalized utterance goes to a
//! per-speaker recognition worker, so one speaker's utterances reach the
//! gate in the order they were spoken while different speakers are
//! recognized concurrently.

use crate::audio::TransportFormat;
use crate::pipeline::gate::GateHandle;
use crate::pipeline::messages::{CallId, Transcription, UserId, Utterance, VoiceInput};
use crate::pipeline::segmenter::SpeakerSegmenter;
use crate::recording::record_utterance;
use crate::runtime::{EventBus, RuntimeEvent};
use crate::stt::SpeechRecognizer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call switches flipped by control operations.
#[derive(Debug)]
pub struct CallFlags {
    pub listening: AtomicBool,
    pub recording: AtomicBool,
}

impl CallFlags {
    pub fn new(listening: bool, recording: bool) -> Self {
        Self {
            listening: AtomicBool::new(listening),
            recording: AtomicBool::new(recording),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }
}

/// State owned by the voice task.
pub struct VoiceStage {
    pub call: CallId,
    pub segmenter: SpeakerSegmenter,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub gate: GateHandle,
    pub flags: Arc<CallFlags>,
    pub format: TransportFormat,
    pub recording_dir: PathBuf,
    pub events: EventBus,
}

/// Spawn the voice task reading from `rx`.
pub fn spawn_voice_stage(
    stage: VoiceStage,
    rx: mpsc::Receiver<VoiceInput>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(stage.run(rx, cancel))
}

impl VoiceStage {
    async fn run(mut self, mut rx: mpsc::Receiver<VoiceInput>, cancel: CancellationToken) {
        info!(call = %self.call, "voice stage started");
        let mut workers: HashMap<UserId, mpsc::UnboundedSender<Utterance>> = HashMap::new();

        loop {
            let input = tokio::select! {
                () = cancel.cancelled() => break,
                input = rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            let finalized = match input {
                VoiceInput::Frame(frame) => self.segmenter.on_frame(frame),
                VoiceInput::Speaking { user, speaking } => {
                    self.segmenter.on_speaking(&user, speaking)
                }
                VoiceInput::SpeakerLeft(user) => {
                    debug!(call = %self.call, %user, "speaker left");
                    self.segmenter.remove_speaker(&user);
                    // Queued utterances still drain before the worker exits.
                    workers.remove(&user);
                    None
                }
            };
            let Some(utterance) = finalized else {
                continue;
            };

            self.events.emit(RuntimeEvent::UtteranceFinalized {
                call: self.call.clone(),
                user: utterance.user.clone(),
                speech_frames: utterance.speech_frames,
                bytes: utterance.pcm.len(),
            });

            if self.flags.is_recording() {
                self.spawn_recording(utterance.clone());
            }
            if !self.flags.is_listening() {
                debug!(call = %self.call, user = %utterance.user, "not listening, utterance dropped");
                continue;
            }

            let worker = workers
                .entry(utterance.user.clone())
                .or_insert_with(|| self.spawn_worker(&utterance.user, cancel.clone()));
            if worker.send(utterance).is_err() {
                warn!(call = %self.call, "recognition worker gone");
            }
        }

        self.segmenter.clear();
        debug!(call = %self.call, "voice stage stopped");
    }

    fn spawn_recording(&self, utterance: Utterance) {
        let dir = self.recording_dir.clone();
        let format = self.format;
        tokio::spawn(async move {
            match record_utterance(&dir, format, &utterance).await {
                Ok(path) => debug!(path = %path.display(), "utterance recorded"),
                Err(e) => warn!(call = %utterance.call, error = %e, "failed to record utterance"),
            }
        });
    }

    fn spawn_worker(
        &self,
        user: &UserId,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedSender<Utterance> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Utterance>();
        let recognizer = Arc::clone(&self.recognizer);
        let gate = self.gate.clone();
        let events = self.events.clone();
        debug!(call = %self.call, %user, "recognition worker started");

        tokio::spawn(async move {
            loop {
                let utterance = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(u) => u,
                        None => break,
                    },
                };

                let text = match recognizer.recognize(&utterance).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(call = %utterance.call, user = %utterance.user, error = %e, "recognition failed");
                        continue;
                    }
                };
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }

                events.emit(RuntimeEvent::Transcribed {
                    call: utterance.call.clone(),
                    user: utterance.user.clone(),
                    text: text.to_owned(),
                });
                let transcription = Transcription {
                    call: utterance.call,
                    user: utterance.user,
                    text: text.to_owned(),
                    audio_finalized_at: utterance.finalized_at,
                    transcribed_at: Instant::now(),
                };
                if gate.push(transcription).await.is_err() {
                    break;
                }
            }
        });
        tx
    }
}
