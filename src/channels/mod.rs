//! Companion text channels.
//!
//! Each call may be paired with a text channel where transcripts and agent
//! replies are mirrored. The channel is injected at join time; the core
//! never owns the chat connection.

pub mod traits;

pub use traits::TextChannel;
