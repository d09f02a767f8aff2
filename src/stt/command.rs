//! Recognizer that shells out to a local speech-to-text CLI.
//!
//! The utterance is written to a temporary WAV file whose path replaces the
//! `{wav}` placeholder in the configured arguments (or is appended when no
//! placeholder is present). Trimmed stdout is the transcript.

use super::SpeechRecognizer;
use crate::audio::TransportFormat;
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::Utterance;
use crate::process::{run_captured, stderr_snippet};
use async_trait::async_trait;
use std::io::Write;
use tracing::debug;

/// Placeholder replaced with the temp WAV path.
pub const WAV_PLACEHOLDER: &str = "{wav}";

/// Local CLI recognizer (whisper.cpp, vosk wrappers, ...).
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    format: TransportFormat,
}

impl CommandRecognizer {
    /// Create a recognizer running `program` with `args`.
    pub fn new(program: &str, args: Vec<String>, format: TransportFormat) -> Self {
        Self {
            program: program.to_owned(),
            args,
            format,
        }
    }

    fn expand_args(&self, wav_path: &str) -> Vec<String> {
        if self.args.iter().any(|a| a.contains(WAV_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|a| a.replace(WAV_PLACEHOLDER, wav_path))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(wav_path.to_owned());
            args
        }
    }
}

#[async_trait]
impl SpeechRecognizer for CommandRecognizer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn recognize(&self, utterance: &Utterance) -> Result<String> {
        let wav = self.format.to_wav(&utterance.pcm)?;
        let temp = tokio::task::spawn_blocking(move || -> Result<tempfile::TempPath> {
            let mut file = tempfile::Builder::new()
                .prefix("huddle-utt-")
                .suffix(".wav")
                .tempfile()?;
            file.write_all(&wav)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|e| HuddleError::Stt(format!("temp wav task failed: {e}")))??;

        let wav_path = temp.to_string_lossy().into_owned();
        let args = self.expand_args(&wav_path);
        debug!(program = %self.program, wav = %wav_path, "running recognizer command");

        let output = run_captured(&self.program, &args, None)
            .await
            .map_err(|e| HuddleError::Stt(format!("failed to run {}: {e}", self.program)))?;
        drop(temp);

        if !output.status.success() {
            return Err(HuddleError::Stt(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_snippet(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}
