//! # huddle-media
//!
//! Media source handling for huddle's playback scheduler.
//!
//! ## Design
//!
//! - [`classify`] decides whether a query is directly playable, a platform
//!   page needing a stream lookup, or free text needing a search
//! - [`MediaResolver`] is the seam to the slow external lookup; the default
//!   backend is [`YtDlpResolver`]
//! - No caching here: the caller owns the TTL cache so resolution, search
//!   and speech synthesis share one eviction policy

pub mod config;
pub mod error;
pub mod resolver;
pub mod source;
pub mod types;
pub mod ytdlp;

pub use config::ResolverConfig;
pub use error::{MediaError, Result};
pub use resolver::MediaResolver;
pub use source::{canonical_url, classify, is_url};
pub use types::{SourceKind, TrackInfo};
pub use ytdlp::YtDlpResolver;
