//! Recognizer backed by a streaming whisper HTTP server.
//!
//! Protocol, one stream per utterance:
//!
//! 1. `POST /stream/start {"stream_id"}`
//! 2. `POST /stream/audio {"stream_id", "audio": <base64 WAV>}` returns
//!    `{"text", "language"?, "error"?}`
//! 3. `POST /stream/end {"stream_id"}` releases server state
//!
//! A reply carrying `error` is a failure even when `text` is present (the
//! server echoes its previous partial result in that case).

use super::SpeechRecognizer;
use crate::audio::TransportFormat;
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::Utterance;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct StreamRef<'a> {
    stream_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AudioRequest<'a> {
    stream_id: &'a str,
    audio: String,
}

#[derive(Debug, Default, Deserialize)]
struct AudioResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Whisper streaming-server client.
pub struct WhisperHttpRecognizer {
    client: reqwest::Client,
    base_url: String,
    format: TransportFormat,
}

impl WhisperHttpRecognizer {
    /// Create a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Config`] if `base_url` is not an http(s) URL.
    pub fn new(base_url: &str, format: TransportFormat) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(HuddleError::Config(format!(
                "whisper base_url must be http(s): {base_url:?}"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: trimmed.to_owned(),
            format,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| HuddleError::Stt(format!("whisper request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(HuddleError::Stt(format!(
                "whisper {path} returned {status}: {}",
                body_text.chars().take(200).collect::<String>()
            )));
        }
        Ok(response)
    }

    async fn transcribe(&self, stream_id: &str, wav: &[u8]) -> Result<String> {
        self.post("/stream/start", &StreamRef { stream_id }).await?;

        let audio = base64::engine::general_purpose::STANDARD.encode(wav);
        let response = self
            .post("/stream/audio", &AudioRequest { stream_id, audio })
            .await?;
        let body: AudioResponse = response
            .json()
            .await
            .map_err(|e| HuddleError::Stt(format!("whisper response was not JSON: {e}")))?;

        if let Some(error) = body.error {
            return Err(HuddleError::Stt(format!("whisper: {error}")));
        }
        debug!(stream_id, language = ?body.language, "whisper transcript received");
        Ok(body.text.trim().to_owned())
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperHttpRecognizer {
    fn name(&self) -> &str {
        "whisper-http"
    }

    async fn recognize(&self, utterance: &Utterance) -> Result<String> {
        let wav = self.format.to_wav(&utterance.pcm)?;
        let stream_id = format!("{}-{}-{}", utterance.call, utterance.user, uuid::Uuid::new_v4());

        let result = self.transcribe(&stream_id, &wav).await;

        if let Err(e) = self.post("/stream/end", &StreamRef { stream_id: &stream_id }).await {
            warn!(stream_id, error = %e, "failed to close whisper stream");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use bytes::Bytes;
    use tokio::time::Instant;
    use base64::Engine as _;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn utterance() -> Utterance {
        let pcm: Vec<u8> = (0..960 * 2).flat_map(|_| 1000_i16.to_le_bytes()).collect();
        Utterance {
            call: "c1".into(),
            user: "u1".into(),
            pcm: Bytes::from(pcm),
            speech_frames: 1,
            finalized_at: Instant::now(),
        }
    }

    async fn mount_start_end(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/stream/start"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "started"})),
            )
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/stream/end"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": ""})))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(WhisperHttpRecognizer::new("localhost:5001", TransportFormat::default()).is_err());
        assert!(WhisperHttpRecognizer::new("http://x/", TransportFormat::default()).is_ok());
    }

    #[tokio::test]
    async fn full_stream_roundtrip_returns_trimmed_text() {
        let server = MockServer::start().await;
        mount_start_end(&server).await;
        Mock::given(method("POST"))
            .and(path("/stream/audio"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "  hey huddle play jazz ",
                "language": "en",
                "stream_id": "ignored"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stt = WhisperHttpRecognizer::new(&server.uri(), TransportFormat::default()).unwrap();
        let text = stt.recognize(&utterance()).await.unwrap();
        assert_eq!(text, "hey huddle play jazz");
    }

    #[tokio::test]
    async fn error_field_is_failure_and_stream_still_closed() {
        let server = MockServer::start().await;
        mount_start_end(&server).await;
        Mock::given(method("POST"))
            .and(path("/stream/audio"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "stale partial",
                "error": "decoder crashed"
            })))
            .mount(&server)
            .await;

        let stt = WhisperHttpRecognizer::new(&server.uri(), TransportFormat::default()).unwrap();
        let err = stt.recognize(&utterance()).await.unwrap_err();
        assert!(err.to_string().contains("decoder crashed"));
    }

    #[tokio::test]
    async fn audio_is_sent_as_base64_wav() {
        let server = MockServer::start().await;
        mount_start_end(&server).await;
        Mock::given(method("POST"))
            .and(path("/stream/audio"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": ""})))
            .mount(&server)
            .await;

        let stt = WhisperHttpRecognizer::new(&server.uri(), TransportFormat::default()).unwrap();
        assert_eq!(stt.recognize(&utterance()).await.unwrap(), "");

        let requests = server.received_requests().await.unwrap();
        let audio_req = requests
            .iter()
            .find(|r| r.url.path() == "/stream/audio")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&audio_req.body).unwrap();
        let wav = base64::engine::general_purpose::STANDARD
            .decode(body["audio"].as_str().unwrap())
            .unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert!(body["stream_id"].as_str().unwrap().starts_with("c1-u1-"));
    }

    #[tokio::test]
    async fn http_error_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream/start"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/stream/end"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": ""})))
            .mount(&server)
            .await;

        let stt = WhisperHttpRecognizer::new(&server.uri(), TransportFormat::default()).unwrap();
        let err = stt.recognize(&utterance()).await.unwrap_err();
        assert!(matches!(err, HuddleError::Stt(ref m) if m.contains("503")));
    }
}
