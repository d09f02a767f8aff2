//! Per-call voice pipeline: frames → utterances → transcripts → turns → replies.

pub mod coordinator;
pub mod gate;
pub mod messages;
pub mod registry;
pub mod reply;
pub mod segmenter;
pub mod voice;

pub use coordinator::{Collaborators, Coordinator, shared_cache};
pub use gate::{GateHandle, WakeMatcher};
pub use messages::{CallId, PcmFrame, SessionId, Transcription, UserId, Utterance, VoiceInput};
pub use registry::{CallRegistry, CallSession};
pub use voice::CallFlags;
