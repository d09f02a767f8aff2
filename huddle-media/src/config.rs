//! Resolver configuration with sensible defaults.
//!
//! [`ResolverConfig`] controls which binary performs lookups, which hosts
//! count as "platform" sources that need stream resolution, and how long a
//! single lookup may take.

use crate::error::MediaError;
use serde::{Deserialize, Serialize};

/// Configuration for the external media resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Resolver executable (looked up on `PATH` when not absolute).
    pub program: String,
    /// Extra arguments passed before every invocation (cookies, proxies, ...).
    pub extra_args: Vec<String>,
    /// Search scheme prefix understood by the resolver, e.g. `ytsearch`
    /// becomes `ytsearch5:<query>` for a five-result lookup.
    pub search_prefix: String,
    /// Format selector passed when resolving a playable stream URL.
    pub format: String,
    /// Hosts whose URLs are platform pages rather than playable media.
    /// Matching is by suffix, so `youtube.com` also covers `m.youtube.com`.
    pub platform_hosts: Vec<String>,
    /// Per-invocation timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_owned(),
            extra_args: Vec::new(),
            search_prefix: "ytsearch".to_owned(),
            format: "bestaudio/best".to_owned(),
            platform_hosts: vec![
                "youtube.com".to_owned(),
                "youtu.be".to_owned(),
                "music.youtube.com".to_owned(),
                "soundcloud.com".to_owned(),
            ],
            timeout_seconds: 20,
        }
    }
}

impl ResolverConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.program.trim().is_empty() {
            return Err(MediaError::Config("program must not be empty".into()));
        }
        if self.search_prefix.trim().is_empty() {
            return Err(MediaError::Config("search_prefix must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(MediaError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
