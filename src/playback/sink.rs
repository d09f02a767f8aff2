//! Outbound audio sink contract.
//!
//! The voice transport owns the real connection. The core addresses every
//! source it starts by a [`TrackHandle`] and learns about completion through
//! [`SinkEvent`]s routed back by the coordinator.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies one source started on a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackHandle(u64);

impl TrackHandle {
    /// Allocate a process-unique handle.
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw handle value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TrackHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle notification from the transport about a started source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkEvent {
    /// The source played to its natural end.
    Ended { handle: TrackHandle },
    /// The source failed mid-stream.
    Errored { handle: TrackHandle, message: String },
}

impl SinkEvent {
    /// Handle the event refers to.
    pub fn handle(&self) -> TrackHandle {
        match self {
            Self::Ended { handle } | Self::Errored { handle, .. } => *handle,
        }
    }
}

/// The single outbound audio sink of a call.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start streaming `url` at `volume` (0.0 to 1.0).
    async fn play_stream(&self, handle: TrackHandle, url: &str, volume: f32) -> Result<()>;

    /// Play an encoded in-memory clip at full volume.
    async fn play_clip(&self, handle: TrackHandle, audio: Bytes) -> Result<()>;

    /// Pause a source, keeping its position.
    async fn pause(&self, handle: TrackHandle) -> Result<()>;

    /// Resume a paused source.
    async fn resume(&self, handle: TrackHandle) -> Result<()>;

    /// Stop a source. No [`SinkEvent`] is expected afterwards.
    async fn stop(&self, handle: TrackHandle) -> Result<()>;

    /// Change a source's volume.
    async fn set_volume(&self, handle: TrackHandle, volume: f32) -> Result<()>;
}
