//! Agent that runs a CLI once per turn.

use super::ConversationAgent;
use crate::config::AgentConfig;
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::SessionId;
use crate::process::{run_captured, stderr_snippet};
use async_trait::async_trait;
use tracing::debug;

/// Runs `program args...` with `{session}` and `{message}` substituted in
/// each argument. Trimmed stdout is the reply.
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
}

impl CommandAgent {
    /// Create an agent from config.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] if no program is configured or no
    /// argument carries the `{message}` placeholder.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(HuddleError::Config("agent.program is empty".into()));
        }
        if !config.args.iter().any(|a| a.contains("{message}")) {
            return Err(HuddleError::Config(
                "agent.args must contain a {message} placeholder".into(),
            ));
        }
        Ok(Self {
            program: config.program.clone(),
            args: config.args.clone(),
        })
    }

    fn render_args(&self, session: &SessionId, message: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                a.replace("{session}", session.as_str())
                    .replace("{message}", message)
            })
            .collect()
    }
}

#[async_trait]
impl ConversationAgent for CommandAgent {
    async fn send(&self, session: &SessionId, message: &str) -> Result<String> {
        let args = self.render_args(session, message);
        debug!(program = %self.program, session = %session, "dispatching to agent");

        let output = run_captured(&self.program, &args, None)
            .await
            .map_err(|e| HuddleError::Agent(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(HuddleError::Agent(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_snippet(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}
