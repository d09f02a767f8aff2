//! Runtime events emitted by call sessions for observability and tests.
//!
//! Events are lightweight (no audio payloads) and fire-and-forget: emitting
//! never blocks and silently drops when nobody is subscribed.

use crate::pipeline::messages::{CallId, SessionId, UserId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events that describe what a call is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A call session was created.
    CallJoined { call: CallId },
    /// A call session was torn down.
    CallLeft { call: CallId },
    /// The segmenter closed an utterance.
    UtteranceFinalized {
        call: CallId,
        user: UserId,
        speech_frames: u32,
        bytes: usize,
    },
    /// Recognition produced non-empty text.
    Transcribed {
        call: CallId,
        user: UserId,
        text: String,
    },
    /// A debounced turn did not pass the wake-word gate.
    TranscriptDiscarded { call: CallId, text: String },
    /// A turn was sent to the agent.
    TurnDispatched {
        call: CallId,
        session: SessionId,
        prompt: String,
    },
    /// The agent replied.
    ReplyReceived { call: CallId, text: String },
    /// A reply clip started playing in the call.
    ReplySpoken { call: CallId, chars: usize },
    /// A turn ended without speech (error, timeout, empty or oversize reply).
    TurnFailed { call: CallId, reason: String },
    /// The agent session of a call was reset.
    SessionReset { call: CallId, session: SessionId },
    /// A track started playing.
    TrackStarted {
        call: CallId,
        title: String,
        attempt: u32,
    },
    /// A track finished naturally.
    TrackEnded { call: CallId, title: String },
    /// A track was abandoned after failing.
    TrackFailed {
        call: CallId,
        title: String,
        reason: String,
    },
    /// Radio mode appended tracks to the queue.
    QueueRefilled { call: CallId, added: usize },
    /// Nothing is playing and the queue is empty.
    PlaybackIdle { call: CallId },
}

/// Cloneable emitter around a broadcast sender.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus holding up to `capacity` unread events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }
}
