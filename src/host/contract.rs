//! Versioned command/event envelopes exchanged with the host shell.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Commands the host shell can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "call.join")]
    CallJoin,
    #[serde(rename = "call.leave")]
    CallLeave,
    #[serde(rename = "call.say")]
    CallSay,
    #[serde(rename = "voice.frame")]
    VoiceFrame,
    #[serde(rename = "voice.speaking")]
    VoiceSpeaking,
    #[serde(rename = "voice.user_left")]
    VoiceUserLeft,
    #[serde(rename = "voice.listen_set")]
    VoiceListenSet,
    #[serde(rename = "voice.record_set")]
    VoiceRecordSet,
    #[serde(rename = "gate.always_respond_set")]
    GateAlwaysRespondSet,
    #[serde(rename = "agent.reset")]
    AgentReset,
    #[serde(rename = "playback.play")]
    PlaybackPlay,
    #[serde(rename = "playback.skip")]
    PlaybackSkip,
    #[serde(rename = "playback.stop")]
    PlaybackStop,
    #[serde(rename = "playback.queue")]
    PlaybackQueue,
    #[serde(rename = "sink.event")]
    SinkEvent,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    /// Every command, in wire order.
    pub const ALL: [Self; 17] = [
        Self::HostPing,
        Self::CallJoin,
        Self::CallLeave,
        Self::CallSay,
        Self::VoiceFrame,
        Self::VoiceSpeaking,
        Self::VoiceUserLeft,
        Self::VoiceListenSet,
        Self::VoiceRecordSet,
        Self::GateAlwaysRespondSet,
        Self::AgentReset,
        Self::PlaybackPlay,
        Self::PlaybackSkip,
        Self::PlaybackStop,
        Self::PlaybackQueue,
        Self::SinkEvent,
        Self::RuntimeStop,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::CallJoin => "call.join",
            Self::CallLeave => "call.leave",
            Self::CallSay => "call.say",
            Self::VoiceFrame => "voice.frame",
            Self::VoiceSpeaking => "voice.speaking",
            Self::VoiceUserLeft => "voice.user_left",
            Self::VoiceListenSet => "voice.listen_set",
            Self::VoiceRecordSet => "voice.record_set",
            Self::GateAlwaysRespondSet => "gate.always_respond_set",
            Self::AgentReset => "agent.reset",
            Self::PlaybackPlay => "playback.play",
            Self::PlaybackSkip => "playback.skip",
            Self::PlaybackStop => "playback.stop",
            Self::PlaybackQueue => "playback.queue",
            Self::SinkEvent => "sink.event",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// A versioned response envelope from bridge -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from host -> bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Check the contract version and that the request id is not blank.
    ///
    /// # Errors
    ///
    /// Returns a [`ContractError`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty",
            ));
        }
        Ok(())
    }

    /// The call this command targets, when its payload names one.
    #[must_use]
    pub fn call_key(&self) -> Option<&str> {
        self.payload
            .get("call")
            .and_then(serde_json::Value::as_str)
            .filter(|call| !call.is_empty())
    }
}

/// A versioned event envelope from bridge -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Why an envelope was refused before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Envelope-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
