//! Huddle: voice turn-taking and shared music playback for group voice calls.
//!
//! Each joined call runs its own pipeline of independent stages connected by
//! async channels:
//!
//! Transport frames → speaker segmenter (VAD) → STT → transcript gate →
//! agent → TTS → mixer → audio sink
//!
//! Next to the voice path, a per-call playback scheduler resolves and queues
//! music (with a radio mode that keeps the queue topped up) on the same sink,
//! and yields to spoken replies. A shared TTL cache memoizes search results,
//! stream URLs, transcripts and synthesized speech.
//!
//! The voice transport itself lives outside the crate: it feeds frames into
//! the [`Coordinator`] and implements [`playback::AudioSink`]. The
//! `huddle-host` binary does this over a newline-delimited JSON protocol.

pub mod agent;
pub mod audio;
pub mod cache;
pub mod channels;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod playback;
pub mod process;
pub mod recording;
pub mod runtime;
pub mod stt;
pub mod tts;
pub mod vad;

pub use config::HuddleConfig;
pub use error::{HuddleError, Result};
pub use pipeline::coordinator::Coordinator;
pub use runtime::RuntimeEvent;
