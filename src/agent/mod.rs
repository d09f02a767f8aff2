//! Conversational agent collaborators.
//!
//! The agent is external: it receives one text message per turn under a
//! session id that is stable for the lifetime of a call, and answers with
//! text. Session priming and the per-turn deadline are applied by the
//! transcript gate, not by implementations.

pub mod command;

pub use command::CommandAgent;

use crate::error::Result;
use crate::pipeline::messages::SessionId;
use async_trait::async_trait;

/// An external conversational agent.
#[async_trait]
pub trait ConversationAgent: Send + Sync {
    /// Send `message` within `session` and return the reply text.
    async fn send(&self, session: &SessionId, message: &str) -> Result<String>;

    /// Forget server-side context for `session`, if the backend keeps any.
    async fn reset(&self, _session: &SessionId) -> Result<()> {
        Ok(())
    }
}
