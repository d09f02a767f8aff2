//! Message types passed between pipeline stages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a voice call (one voice channel membership).
    CallId
);
string_id!(
    /// Identifier of a participant in a call.
    UserId
);
string_id!(
    /// Conversational agent session identifier, stable per call.
    SessionId
);

/// One packet of decoded transport audio from a single speaker.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    /// Speaker that produced the frame.
    pub user: UserId,
    /// Interleaved signed 16-bit little-endian samples.
    pub data: Bytes,
    /// Arrival time at the transport boundary.
    pub received_at: Instant,
}

/// Input to a call's segmenter stage, in transport arrival order.
#[derive(Debug, Clone)]
pub enum VoiceInput {
    /// A decoded audio frame.
    Frame(PcmFrame),
    /// The transport's speaking indicator changed for a user.
    Speaking {
        /// Speaker whose indicator changed.
        user: UserId,
        /// `true` on start, `false` on end.
        speaking: bool,
    },
    /// A user left the call; their partial speech is discarded.
    SpeakerLeft(UserId),
}

/// A finalized span of one speaker's audio, ready for recognition.
///
/// Cheap to clone; the audio is reference counted and never mutated.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Call the speaker is in.
    pub call: CallId,
    /// Speaker.
    pub user: UserId,
    /// Concatenated transport frames (s16le, transport rate and layout).
    pub pcm: Bytes,
    /// Number of frames in `pcm` classified as speech.
    pub speech_frames: u32,
    /// Finalization time.
    pub finalized_at: Instant,
}

impl Utterance {
    /// Total sample count across all channels.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Text recognized from one utterance.
#[derive(Debug, Clone)]
pub struct Transcription {
    /// Call the utterance belonged to.
    pub call: CallId,
    /// Speaker.
    pub user: UserId,
    /// Recognized text (never empty when delivered to the gate).
    pub text: String,
    /// When the utterance was finalized.
    pub audio_finalized_at: Instant,
    /// When recognition completed.
    pub transcribed_at: Instant,
}
