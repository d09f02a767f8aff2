//! Signed 16-bit PCM helpers.
//!
//! Transport audio arrives as interleaved s16le at 48 kHz stereo; recognizers
//! want 16 kHz mono WAV. Everything here is synchronous and allocation-light
//! so it can run inline on the segmenter task.

use crate::config::AudioConfig;
use crate::error::{HuddleError, Result};
use std::io::Cursor;
use std::path::Path;

/// Decode interleaved little-endian `i16` samples.
///
/// # Errors
///
/// Returns [`HuddleError::Audio`] if `bytes` has an odd length.
pub fn decode_s16le(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(HuddleError::Audio(format!(
            "s16le payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// RMS of `samples` normalized to \[0, 1\].
pub fn normalized_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32_768.0;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Average interleaved channels into mono `f32` in \[-1, 1\].
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| f32::from(s) / 32_768.0).sum();
            sum / frame.len() as f32
        })
        .collect()
}

/// Linear-interpolation resampler for mono audio.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_len = ((input.len() as f64) * ratio).round() as usize;
    let last = input.len() - 1;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src = (i as f64) / ratio;
        let i0 = (src.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let t = (src - i0 as f64) as f32;
        out.push(input[i0] * (1.0 - t) + input[i1] * t);
    }
    out
}

/// Layout of transport audio and the rate recognizers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportFormat {
    /// Interleaved channels in transport frames.
    pub channels: u16,
    /// Transport sample rate in Hz.
    pub transport_rate: u32,
    /// Recognizer sample rate in Hz.
    pub recognizer_rate: u32,
}

impl From<&AudioConfig> for TransportFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            channels: config.transport_channels,
            transport_rate: config.transport_sample_rate,
            recognizer_rate: config.recognizer_sample_rate,
        }
    }
}

impl Default for TransportFormat {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl TransportFormat {
    /// Convert transport PCM to recognizer audio.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Audio`] if `pcm` is not valid s16le.
    pub fn to_recognizer(&self, pcm: &[u8]) -> Result<RecognizerAudio> {
        RecognizerAudio::from_transport(
            pcm,
            self.channels,
            self.transport_rate,
            self.recognizer_rate,
        )
    }

    /// Convert transport PCM straight to a recognizer-rate WAV file.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Audio`] on decode or encode failure.
    pub fn to_wav(&self, pcm: &[u8]) -> Result<Vec<u8>> {
        self.to_recognizer(pcm)?.to_wav()
    }
}

/// Mono 16-bit audio at the recognizer sample rate.
#[derive(Debug, Clone)]
pub struct RecognizerAudio {
    /// Mono samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl RecognizerAudio {
    /// Convert transport PCM to recognizer format.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Audio`] if `pcm` is not valid s16le.
    pub fn from_transport(
        pcm: &[u8],
        channels: u16,
        transport_rate: u32,
        recognizer_rate: u32,
    ) -> Result<Self> {
        let interleaved = decode_s16le(pcm)?;
        let mono = downmix_to_mono(&interleaved, channels);
        let resampled = resample_linear(&mono, transport_rate, recognizer_rate);
        let samples = resampled
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16)
            .collect();
        Ok(Self {
            samples,
            sample_rate: recognizer_rate,
        })
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }

    /// Encode as an in-memory mono WAV file.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Audio`] if encoding fails.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        encode_wav(&self.samples, self.sample_rate)
    }
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode mono samples as a WAV file in memory.
///
/// # Errors
///
/// Returns [`HuddleError::Audio`] if the writer fails.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))
            .map_err(|e| HuddleError::Audio(format!("failed to create wav writer: {e}")))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| HuddleError::Audio(format!("failed to write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| HuddleError::Audio(format!("failed to finalize wav: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Write mono samples to a WAV file, creating parent directories.
///
/// Blocking; call from `spawn_blocking` on the async runtime.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_wav_file(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate))
        .map_err(|e| HuddleError::Audio(format!("failed to create {}: {e}", path.display())))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| HuddleError::Audio(format!("failed to write wav sample: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| HuddleError::Audio(format!("failed to finalize wav: {e}")))?;
    Ok(())
}
