//! Configuration types for call sessions and their collaborators.

use crate::error::{HuddleError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use huddle_media::ResolverConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HuddleConfig {
    /// Transport audio format and frame admission.
    pub audio: AudioConfig,
    /// Voice activity detection and utterance segmentation.
    pub vad: VadConfig,
    /// Transcript gate (debounce, wake words, reply limits).
    pub gate: GateConfig,
    /// Speech-to-text backends.
    pub stt: SttConfig,
    /// Conversational agent command.
    pub agent: AgentConfig,
    /// Text-to-speech command.
    pub tts: TtsConfig,
    /// Resolution cache TTLs and limits.
    pub cache: CacheConfig,
    /// Queue and radio settings.
    pub playback: PlaybackConfig,
    /// Music/speech arbitration on the outbound sink.
    pub mixer: MixerConfig,
    /// Media resolver (yt-dlp) settings.
    pub media: ResolverConfig,
    /// Per-utterance WAV recording.
    pub recording: RecordingConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Audio format delivered by the voice transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of incoming frames in Hz.
    pub transport_sample_rate: u32,
    /// Interleaved channel count of incoming frames.
    pub transport_channels: u16,
    /// Sample rate handed to recognizers and recordings.
    pub recognizer_sample_rate: u32,
    /// Frames shorter than this many bytes are discarded.
    pub min_frame_bytes: usize,
    /// Capacity of the per-call frame channel.
    pub frame_queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            transport_sample_rate: 48_000,
            transport_channels: 2,
            recognizer_sample_rate: 16_000,
            min_frame_bytes: 64,
            frame_queue_capacity: 512,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for speech detection.
    ///
    /// Frames with normalized RMS above this value are classified as speech.
    /// Typical values for samples in \[-1, 1\]:
    ///   - 0.005: very sensitive (picks up quiet speech and some noise)
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.02:  noisy rooms
    pub threshold: f32,
    /// Consecutive non-speech frames that end an utterance.
    pub silence_frames: u32,
    /// Frames kept in the rolling buffer and prepended when speech starts.
    pub pre_roll_frames: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            silence_frames: 10,
            pre_roll_frames: 3,
        }
    }
}

/// Transcript gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Words that open a turn (matched case-insensitively).
    pub wake_words: Vec<String>,
    /// Dispatch every turn regardless of wake words.
    pub always_respond: bool,
    /// Quiet period after the last transcript before the turn is judged.
    pub debounce_ms: u64,
    /// Replies longer than this are not spoken.
    pub max_reply_chars: usize,
    /// Leading words stripped before the wake word in the prompt.
    pub greetings: Vec<String>,
    /// Prefix of the per-call agent session id.
    pub session_prefix: String,
    /// Mirror agent replies to the call's text channel.
    pub post_to_channel: bool,
    /// Whether a newly joined call starts with recognition enabled.
    pub listen_on_join: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            wake_words: vec!["huddle".to_owned()],
            always_respond: false,
            debounce_ms: 1500,
            max_reply_chars: 800,
            greetings: ["hey", "okay", "ok", "hi", "hello", "yo"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            session_prefix: "huddle".to_owned(),
            post_to_channel: true,
            listen_on_join: true,
        }
    }
}

/// One speech-to-text engine, tried in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SttBackendConfig {
    /// Streaming whisper HTTP server.
    WhisperHttp {
        /// Base URL, e.g. `http://127.0.0.1:5001`.
        base_url: String,
    },
    /// Local CLI that reads a WAV path and prints the transcript.
    Command {
        /// Program to execute.
        program: String,
        /// Arguments; `{wav}` is replaced with the temp file path.
        args: Vec<String>,
    },
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Engines in priority order.
    pub backends: Vec<SttBackendConfig>,
    /// Per-engine deadline in seconds.
    pub timeout_secs: u64,
    /// Deadline in seconds for the whole engine chain.
    pub total_timeout_secs: u64,
    /// Memoize results by audio content hash.
    pub memoize: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backends: vec![SttBackendConfig::WhisperHttp {
                base_url: "http://127.0.0.1:5001".to_owned(),
            }],
            timeout_secs: 20,
            total_timeout_secs: 30,
            memoize: true,
        }
    }
}

/// Conversational agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Program invoked once per turn.
    pub program: String,
    /// Arguments; `{session}` and `{message}` are substituted.
    pub args: Vec<String>,
    /// Deadline for one turn in seconds.
    pub timeout_secs: u64,
    /// Text prefixed to the first message of a session.
    pub primer: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "huddle-agent".to_owned(),
            args: vec![
                "--session".to_owned(),
                "{session}".to_owned(),
                "{message}".to_owned(),
            ],
            timeout_secs: 30,
            primer: Some(
                "You are listening to a group voice call. Replies are spoken aloud: \
                 keep them short and avoid markdown."
                    .to_owned(),
            ),
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Speak agent replies into the call.
    pub enabled: bool,
    /// Program that reads text on stdin and writes audio to stdout.
    pub program: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Deadline for one synthesis in seconds.
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "piper".to_owned(),
            args: vec!["--output_file".to_owned(), "-".to_owned()],
            timeout_secs: 20,
        }
    }
}

/// Resolution cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL of resolved stream URLs.
    pub resolve_ttl_secs: u64,
    /// TTL of search results.
    pub search_ttl_secs: u64,
    /// TTL of synthesized speech.
    pub tts_ttl_secs: u64,
    /// TTL of memoized transcripts.
    pub stt_ttl_secs: u64,
    /// Synthesized speech entries kept before oldest-first eviction.
    pub tts_max_entries: usize,
    /// Period of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resolve_ttl_secs: 30 * 60,
            search_ttl_secs: 60 * 60,
            tts_ttl_secs: 60 * 60,
            stt_ttl_secs: 10 * 60,
            tts_max_entries: 200,
            sweep_interval_secs: 5 * 60,
        }
    }
}

/// Queue and radio configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Maximum pending tracks per call.
    pub max_queue: usize,
    /// Candidates fetched per radio refill.
    pub radio_batch: usize,
    /// Queue length below which radio refills pre-emptively.
    pub radio_low_water: usize,
    /// Words that switch a play request into radio mode.
    pub radio_keywords: Vec<String>,
    /// Played URLs remembered per radio session to avoid repeats.
    pub radio_history: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_queue: 50,
            radio_batch: 5,
            radio_low_water: 3,
            radio_keywords: vec!["radio".to_owned(), "mix".to_owned()],
            radio_history: 200,
        }
    }
}

/// How music yields to speech.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixMode {
    /// Lower music volume while speech plays.
    #[default]
    Duck,
    /// Pause music while speech plays.
    Pause,
}

/// Mixer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Duck or pause.
    pub mode: MixMode,
    /// Normal music volume (0.0 to 1.0).
    pub music_volume: f32,
    /// Music volume while ducked.
    pub duck_volume: f32,
    /// Speech clips are force-stopped after this many seconds.
    pub speech_timeout_secs: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            mode: MixMode::Duck,
            music_volume: 1.0,
            duck_volume: 0.2,
            speech_timeout_secs: 60,
        }
    }
}

/// Utterance recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root directory; one sub-directory per call.
    pub dir: PathBuf,
    /// Whether a newly joined call starts with recording enabled.
    pub record_on_join: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            dir: base.join("huddle").join("recordings"),
            record_on_join: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily log files (None = stderr only).
    pub log_dir: Option<PathBuf>,
    /// Daily log files kept in `log_dir`.
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            log_dir: None,
            max_files: 7,
        }
    }
}

impl HuddleConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| HuddleError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HuddleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/huddle/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("huddle").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("huddle")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/huddle-config/config.toml")
        }
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        fn bad(msg: &str) -> Result<()> {
            Err(HuddleError::Config(msg.to_owned()))
        }

        if self.audio.transport_sample_rate == 0 || self.audio.recognizer_sample_rate == 0 {
            return bad("audio sample rates must be non-zero");
        }
        if self.audio.transport_channels == 0 {
            return bad("audio.transport_channels must be non-zero");
        }
        if self.audio.recognizer_sample_rate > self.audio.transport_sample_rate {
            return bad("audio.recognizer_sample_rate cannot exceed the transport rate");
        }
        if self.audio.frame_queue_capacity == 0 {
            return bad("audio.frame_queue_capacity must be non-zero");
        }
        if !(self.vad.threshold.is_finite() && self.vad.threshold > 0.0) {
            return bad("vad.threshold must be a positive number");
        }
        if self.vad.silence_frames == 0 {
            return bad("vad.silence_frames must be non-zero");
        }
        if self.gate.debounce_ms == 0 {
            return bad("gate.debounce_ms must be non-zero");
        }
        if !self.gate.always_respond && self.gate.wake_words.iter().all(|w| w.trim().is_empty())
        {
            return bad("gate.wake_words is empty and always_respond is off");
        }
        if self.stt.backends.is_empty() {
            return bad("stt.backends must list at least one engine");
        }
        if self.agent.program.trim().is_empty() {
            return bad("agent.program must be set");
        }
        if self.tts.enabled && self.tts.program.trim().is_empty() {
            return bad("tts.program must be set when tts is enabled");
        }
        if self.stt.timeout_secs == 0
            || self.stt.total_timeout_secs == 0
            || self.agent.timeout_secs == 0
            || self.tts.timeout_secs == 0
        {
            return bad("timeouts must be non-zero");
        }
        if self.cache.sweep_interval_secs == 0 {
            return bad("cache.sweep_interval_secs must be non-zero");
        }
        if self.playback.max_queue == 0 {
            return bad("playback.max_queue must be non-zero");
        }
        if self.playback.radio_batch == 0 {
            return bad("playback.radio_batch must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.mixer.duck_volume)
            || !(0.0..=1.0).contains(&self.mixer.music_volume)
        {
            return bad("mixer volumes must be within 0.0..=1.0");
        }
        self.media
            .validate()
            .map_err(|e| HuddleError::Config(e.to_string()))
    }
}
