//! Core types for media lookups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single candidate track returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Display title.
    pub title: String,
    /// Source reference: a platform page URL or a direct media URL.
    pub url: String,
    /// Duration in whole seconds, when the resolver reports one.
    pub duration_secs: Option<u64>,
}

/// How a user-supplied query should be treated before playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// A URL that a player can open as-is (file, radio stream, CDN link).
    DirectUrl,
    /// A URL on a known platform that must be resolved to a stream URL.
    PlatformUrl,
    /// Free text that must be searched first.
    SearchTerm,
}

impl SourceKind {
    /// Returns a short stable label, used in logs and cache keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectUrl => "direct",
            Self::PlatformUrl => "platform",
            Self::SearchTerm => "search",
        }
    }

    /// Whether this source needs the resolver before it can be played.
    pub fn needs_resolution(&self) -> bool {
        !matches!(self, Self::DirectUrl)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
