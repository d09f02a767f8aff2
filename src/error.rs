//! Error types for the huddle pipeline.

/// Top-level error type for call sessions and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    /// Audio frame decode or encode error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text recognition error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Conversational agent error.
    #[error("agent error: {0}")]
    Agent(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Media search or stream resolution error.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Playback scheduler or sink error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error (actor gone, call torn down).
    #[error("channel error: {0}")]
    Channel(String),

    /// External call exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Request refused because a bounded resource is full.
    #[error("rejected: {0}")]
    Rejected(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<huddle_media::MediaError> for HuddleError {
    fn from(e: huddle_media::MediaError) -> Self {
        match e {
            huddle_media::MediaError::Timeout(msg) => Self::Timeout(msg),
            other => Self::Resolve(other.to_string()),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HuddleError>;
