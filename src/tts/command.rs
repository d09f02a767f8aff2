//! Synthesizer that pipes text through a CLI (piper, espeak, ...).

use super::SpeechSynthesizer;
use crate::config::TtsConfig;
use crate::error::{HuddleError, Result};
use crate::process::{run_captured, stderr_snippet};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Writes text to the program's stdin and takes stdout as audio.
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    /// Create a synthesizer from config.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] if no program is configured.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(HuddleError::Config("tts.program is empty".into()));
        }
        Ok(Self {
            program: config.program.clone(),
            args: config.args.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        debug!(program = %self.program, chars = text.chars().count(), "synthesizing");
        let output = run_captured(&self.program, &self.args, Some(text.as_bytes()))
            .await
            .map_err(|e| HuddleError::Tts(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(HuddleError::Tts(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_snippet(&output)
            )));
        }
        if output.stdout.is_empty() {
            return Err(HuddleError::Tts(format!("{} produced no audio", self.program)));
        }
        Ok(Bytes::from(output.stdout))
    }
}
