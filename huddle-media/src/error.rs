//! Error types for the huddle-media crate.
//!
//! Messages are stable strings suitable for showing to the user who
//! requested a track. Raw resolver stderr is truncated before it lands here.

/// Errors that can occur while classifying or resolving media sources.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The resolver found nothing for the query.
    #[error("no results for query: {0}")]
    NoResults(String),

    /// The resolver process could not be spawned or exited non-zero.
    #[error("resolver failed: {0}")]
    Resolver(String),

    /// The resolver did not answer within the configured timeout.
    #[error("resolver timed out: {0}")]
    Timeout(String),

    /// Resolver output could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid resolver configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience type alias for huddle-media results.
pub type Result<T> = std::result::Result<T, MediaError>;
