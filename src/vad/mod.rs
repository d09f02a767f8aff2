//! Voice activity detection using energy-based analysis.
//!
//! Classifies individual transport frames as speech or silence. Segment
//! boundaries (silence runs, speaking signals) are the segmenter's job.

use crate::audio::pcm::normalized_rms;
use crate::config::VadConfig;
use crate::error::{HuddleError, Result};

/// Per-frame speech classifier.
///
/// One instance is owned by each speaker so adaptive implementations can
/// keep per-speaker state.
pub trait VoiceActivity: Send {
    /// Returns `true` when `samples` (interleaved s16) contain speech.
    fn is_speech(&mut self, samples: &[i16]) -> bool;

    /// Forget any adaptive state.
    fn reset(&mut self) {}
}

/// Voice activity detector using RMS energy thresholding.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create a detector from config.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Vad`] if the threshold is not a positive number.
    pub fn new(config: &VadConfig) -> Result<Self> {
        if !(config.threshold.is_finite() && config.threshold > 0.0) {
            return Err(HuddleError::Vad(format!(
                "threshold must be positive, got {}",
                config.threshold
            )));
        }
        Ok(Self {
            threshold: config.threshold,
        })
    }

    /// Configured RMS threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl VoiceActivity for EnergyVad {
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        normalized_rms(samples) > self.threshold
    }
}
