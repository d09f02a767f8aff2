//! Optional on-disk copies of finalized utterances.
//!
//! Files land at `<dir>/<call>/<user>-<utc timestamp>.wav` as mono WAV at the
//! recognizer rate, the same audio the recognizer sees.

use crate::audio::{TransportFormat, write_wav_file};
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::{CallId, UserId, Utterance};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Replace path separators and other awkward characters in an id.
fn path_component(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Where an utterance by `user` finalized at `at` is written.
pub fn recording_path(dir: &Path, call: &CallId, user: &UserId, at: DateTime<Utc>) -> PathBuf {
    dir.join(path_component(call.as_str())).join(format!(
        "{}-{}.wav",
        path_component(user.as_str()),
        at.format("%Y%m%dT%H%M%S%.3fZ")
    ))
}

/// Write `utterance` under `dir`, off the async runtime.
///
/// # Errors
///
/// Returns audio conversion or I/O errors.
pub async fn record_utterance(
    dir: &Path,
    format: TransportFormat,
    utterance: &Utterance,
) -> Result<PathBuf> {
    let path = recording_path(dir, &utterance.call, &utterance.user, Utc::now());
    let pcm = utterance.pcm.clone();
    let target = path.clone();
    tokio::task::spawn_blocking(move || {
        let audio = format.to_recognizer(&pcm)?;
        write_wav_file(&target, &audio.samples, audio.sample_rate)
    })
    .await
    .map_err(|e| HuddleError::Audio(format!("recording task failed: {e}")))??;
    Ok(path)
}
