//! Music queue, radio mode and speech/music arbitration per call.

pub mod actor;
pub mod mixer;
pub mod queue;
pub mod scheduler;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use actor::{PlaybackCommand, PlaybackHandle, spawn_playback};
pub use mixer::Mixer;
pub use queue::{QueuedTrack, RadioState, TrackQueue};
pub use scheduler::{NowPlaying, PlayOutcome, PlaybackScheduler, QueueSnapshot, is_radio_request};
pub use sink::{AudioSink, SinkEvent, TrackHandle};
