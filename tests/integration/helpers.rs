//! Shared fakes and helpers for integration tests.
//!
//! Every collaborator is in-memory and records what it was asked to do, so
//! tests drive a real [`Coordinator`] and assert on the side effects.

use async_trait::async_trait;
use bytes::Bytes;
use huddle::agent::ConversationAgent;
use huddle::channels::TextChannel;
use huddle::error::Result;
use huddle::pipeline::messages::{CallId, SessionId, UserId, Utterance};
use huddle::pipeline::{Collaborators, Coordinator, shared_cache};
use huddle::playback::{AudioSink, TrackHandle};
use huddle::stt::SpeechRecognizer;
use huddle::tts::SpeechSynthesizer;
use huddle::{HuddleConfig, RuntimeEvent};
use huddle_media::{MediaError, MediaResolver, TrackInfo};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Recognizer that returns queued text per speaker, empty when none is left.
#[derive(Default)]
pub(crate) struct ScriptedRecognizer {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub(crate) fn script(&self, user: &str, text: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(user.to_owned())
            .or_default()
            .push_back(text.to_owned());
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(&self, utterance: &Utterance) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .scripts
            .lock()
            .unwrap()
            .get_mut(utterance.user.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }
}

/// Agent that records every message and answers with a fixed reply.
pub(crate) struct RecordingAgent {
    messages: Mutex<Vec<(String, String)>>,
    reply: Mutex<String>,
    pub(crate) resets: AtomicUsize,
}

impl Default for RecordingAgent {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            reply: Mutex::new("sounds good".to_owned()),
            resets: AtomicUsize::new(0),
        }
    }
}

impl RecordingAgent {
    pub(crate) fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_owned();
    }
}

#[async_trait]
impl ConversationAgent for RecordingAgent {
    async fn send(&self, session: &SessionId, message: &str) -> Result<String> {
        self.messages
            .lock()
            .unwrap()
            .push((session.to_string(), message.to_owned()));
        Ok(self.reply.lock().unwrap().clone())
    }

    async fn reset(&self, _session: &SessionId) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Synthesizer producing `audio:<text>` bytes.
#[derive(Default)]
pub(crate) struct EchoSynthesizer {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("audio:{text}")))
    }
}

/// Resolver with numbered search hits and counted stream resolutions.
#[derive(Default)]
pub(crate) struct CountingResolver {
    searches: Mutex<Vec<(String, usize)>>,
    search_delay: Mutex<Duration>,
    pub(crate) resolves: AtomicUsize,
}

impl CountingResolver {
    /// Make every later search take `delay` before answering.
    pub(crate) fn delay_searches(&self, delay: Duration) {
        *self.search_delay.lock().unwrap() = delay;
    }

    pub(crate) fn searches(&self) -> Vec<(String, usize)> {
        self.searches.lock().unwrap().clone()
    }

    pub(crate) fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaResolver for CountingResolver {
    async fn search(&self, query: &str, limit: usize) -> huddle_media::Result<Vec<TrackInfo>> {
        self.searches.lock().unwrap().push((query.to_owned(), limit));
        let delay = *self.search_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let slug = query.replace(' ', "-");
        Ok((0..limit)
            .map(|i| TrackInfo {
                title: format!("{query} #{i}"),
                url: format!("https://www.youtube.com/watch?v={slug}-{i}"),
                duration_secs: Some(200),
            })
            .collect())
    }

    async fn stream_url(&self, source: &str) -> huddle_media::Result<String> {
        let n = self.resolves.fetch_add(1, Ordering::SeqCst);
        if source.contains("gone") {
            return Err(MediaError::Resolver("video unavailable".into()));
        }
        Ok(format!("https://cdn.example/{n}.webm"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkOp {
    Stream(TrackHandle, String, f32),
    Clip(TrackHandle, Bytes),
    Pause(TrackHandle),
    Resume(TrackHandle),
    Stop(TrackHandle),
    Volume(TrackHandle, f32),
}

/// Sink recording every operation in order.
#[derive(Default)]
pub(crate) struct RecordingSink {
    ops: Mutex<Vec<SinkOp>>,
}

impl RecordingSink {
    pub(crate) fn ops(&self) -> Vec<SinkOp> {
        self.ops.lock().unwrap().clone()
    }

    pub(crate) fn streams(&self) -> Vec<(TrackHandle, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Stream(handle, url, _) => Some((handle, url)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clips(&self) -> Vec<Bytes> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Clip(_, audio) => Some(audio),
                _ => None,
            })
            .collect()
    }

    fn push(&self, op: SinkOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play_stream(&self, handle: TrackHandle, url: &str, volume: f32) -> Result<()> {
        self.push(SinkOp::Stream(handle, url.to_owned(), volume));
        Ok(())
    }

    async fn play_clip(&self, handle: TrackHandle, audio: Bytes) -> Result<()> {
        self.push(SinkOp::Clip(handle, audio));
        Ok(())
    }

    async fn pause(&self, handle: TrackHandle) -> Result<()> {
        self.push(SinkOp::Pause(handle));
        Ok(())
    }

    async fn resume(&self, handle: TrackHandle) -> Result<()> {
        self.push(SinkOp::Resume(handle));
        Ok(())
    }

    async fn stop(&self, handle: TrackHandle) -> Result<()> {
        self.push(SinkOp::Stop(handle));
        Ok(())
    }

    async fn set_volume(&self, handle: TrackHandle, volume: f32) -> Result<()> {
        self.push(SinkOp::Volume(handle, volume));
        Ok(())
    }
}

/// Text channel collecting posted messages.
pub(crate) struct CollectingChannel {
    id: String,
    posted: Mutex<Vec<String>>,
}

impl CollectingChannel {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            posted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn posted(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextChannel for CollectingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn post(&self, text: &str) -> Result<()> {
        self.posted.lock().unwrap().push(text.to_owned());
        Ok(())
    }
}

/// A coordinator wired to fakes, with handles to inspect them.
pub(crate) struct Harness {
    pub(crate) coordinator: Coordinator,
    pub(crate) recognizer: Arc<ScriptedRecognizer>,
    pub(crate) agent: Arc<RecordingAgent>,
    pub(crate) synthesizer: Arc<EchoSynthesizer>,
    pub(crate) resolver: Arc<CountingResolver>,
}

/// Defaults with wake word "echo", no primer and recordings under `tmp`.
pub(crate) fn test_config(tmp: &std::path::Path) -> HuddleConfig {
    let mut config = HuddleConfig::default();
    config.gate.wake_words = vec!["echo".to_owned()];
    config.agent.primer = None;
    config.recording.dir = tmp.join("recordings");
    config
}

/// Build a coordinator over fresh fakes. Must run inside a tokio runtime.
pub(crate) fn harness(config: HuddleConfig) -> Harness {
    let recognizer = Arc::new(ScriptedRecognizer::default());
    let agent = Arc::new(RecordingAgent::default());
    let synthesizer = Arc::new(EchoSynthesizer::default());
    let resolver = Arc::new(CountingResolver::default());
    let cache = shared_cache(&config);
    let coordinator = Coordinator::new(
        config,
        cache,
        Collaborators {
            recognizer: Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
            agent: Arc::clone(&agent) as Arc<dyn ConversationAgent>,
            synthesizer: Some(Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>),
            resolver: Arc::clone(&resolver) as Arc<dyn MediaResolver>,
        },
    )
    .expect("valid test config");
    Harness {
        coordinator,
        recognizer,
        agent,
        synthesizer,
        resolver,
    }
}

/// One 20 ms transport frame (48 kHz stereo s16le) of loud square wave.
pub(crate) fn speech_frame() -> Bytes {
    let samples: Vec<u8> = (0..1920)
        .flat_map(|i| {
            let s: i16 = if i % 4 < 2 { 8000 } else { -8000 };
            s.to_le_bytes()
        })
        .collect();
    Bytes::from(samples)
}

/// One 20 ms transport frame of digital silence.
pub(crate) fn silence_frame() -> Bytes {
    Bytes::from(vec![0u8; 3840])
}

/// Feed `frames` speech frames for `user`, then the end-of-speaking signal.
pub(crate) async fn speak(coordinator: &Coordinator, call: &CallId, user: &str, frames: usize) {
    for _ in 0..frames {
        coordinator
            .on_frame(call, UserId::from(user), speech_frame())
            .unwrap();
    }
    coordinator
        .on_speaking(call, UserId::from(user), false)
        .await
        .unwrap();
}

/// Wait (up to a minute of runtime time) for the first event matching `pred`.
pub(crate) async fn wait_for<F>(rx: &mut broadcast::Receiver<RuntimeEvent>, pred: F) -> RuntimeEvent
where
    F: Fn(&RuntimeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for runtime event")
}
