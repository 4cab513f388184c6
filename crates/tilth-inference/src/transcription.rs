//! Transcription backend trait and the OpenAI-compatible Whisper implementation.

use async_trait::async_trait;
use serde::Deserialize;

use tilth_core::models::MediaSegment;
use tilth_core::{defaults, Error, Result};

/// Options forwarded to the transcription service.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionOptions {
    /// ISO 639-1 language hint (e.g. "en").
    pub language: Option<String>,
    /// Domain prompt to bias the decoder (crop names, jargon).
    pub prompt: Option<String>,
    /// Sampling temperature; None lets the service decide.
    pub temperature: Option<f32>,
}

/// Result of one transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// Full transcribed text.
    pub text: String,
    /// Detected language (ISO 639-1 code).
    pub language: Option<String>,
    /// Total audio duration in seconds.
    pub duration_secs: f64,
    /// Mean confidence reported by the service, when available.
    pub confidence: Option<f64>,
    /// Timestamped segments.
    pub segments: Vec<MediaSegment>,
}

/// Backend for transcribing audio payloads.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe audio data.
    async fn transcribe(
        &self,
        audio_data: &[u8],
        mime_type: &str,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult>;

    /// Fixed maximum payload size the service accepts, in bytes.
    ///
    /// The chunked adapter splits inputs above this ceiling; the ceiling is
    /// configuration, not logic.
    fn max_payload_bytes(&self) -> u64;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible Whisper backend (works with Speaches/faster-whisper-server).
pub struct WhisperBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    max_payload_bytes: u64,
    timeout_secs: u64,
}

impl WhisperBackend {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            max_payload_bytes: defaults::TRANSCRIBE_MAX_BYTES,
            timeout_secs: defaults::TRANSCRIBE_TIMEOUT_SECS,
        }
    }

    /// Override the service payload ceiling.
    pub fn with_max_payload_bytes(mut self, bytes: u64) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Create from environment variables.
    /// Returns None if WHISPER_BASE_URL is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(defaults::ENV_WHISPER_BASE_URL).ok()?;
        if base_url.is_empty() {
            return None;
        }
        let model = std::env::var(defaults::ENV_WHISPER_MODEL)
            .unwrap_or_else(|_| defaults::DEFAULT_WHISPER_MODEL.to_string());
        Some(Self::new(base_url, model))
    }

    /// Map an HTTP failure status to the structured error taxonomy.
    ///
    /// Classification happens here, at the collaborator boundary, so the
    /// retry machinery never has to inspect response text.
    fn status_error(status: reqwest::StatusCode, body: String) -> Error {
        use reqwest::StatusCode;
        let detail = format!("Whisper API returned {}: {}", status, body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(detail),
            StatusCode::BAD_REQUEST => Error::InvalidInput(detail),
            StatusCode::PAYLOAD_TOO_LARGE => Error::PayloadTooLarge(detail),
            StatusCode::UNSUPPORTED_MEDIA_TYPE => Error::UnsupportedInput(detail),
            _ => Error::Transcription(detail),
        }
    }
}

/// OpenAI Whisper verbose_json response format.
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: Option<f64>,
}

/// File extension for the multipart part, from the MIME type.
fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/aac" => "aac",
        "audio/webm" => "webm",
        "audio/mp4" | "audio/m4a" => "m4a",
        _ => "wav",
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    async fn transcribe(
        &self,
        audio_data: &[u8],
        mime_type: &str,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult> {
        if audio_data.len() as u64 > self.max_payload_bytes {
            return Err(Error::PayloadTooLarge(format!(
                "{} bytes exceeds service ceiling of {} bytes",
                audio_data.len(),
                self.max_payload_bytes
            )));
        }

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let ext = extension_for_mime(mime_type);

        let file_part = reqwest::multipart::Part::bytes(audio_data.to_vec())
            .file_name(format!("audio.{}", ext))
            .mime_str(mime_type)
            .map_err(|e| Error::Internal(format!("Failed to create multipart: {}", e)))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        if let Some(lang) = &options.language {
            form = form.text("language", lang.clone());
        }
        if let Some(prompt) = &options.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(temp) = options.temperature {
            form = form.text("temperature", temp.to_string());
        }

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Transcription(format!("Transcription request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("Failed to parse whisper response: {}", e)))?;

        let raw_segments = result.segments.unwrap_or_default();

        // avg_logprob is in (-inf, 0]; exp maps it onto (0, 1].
        let confidence = if raw_segments.iter().any(|s| s.avg_logprob.is_some()) {
            let probs: Vec<f64> = raw_segments
                .iter()
                .filter_map(|s| s.avg_logprob)
                .map(f64::exp)
                .collect();
            Some(probs.iter().sum::<f64>() / probs.len() as f64)
        } else {
            None
        };

        let segments: Vec<MediaSegment> = raw_segments
            .into_iter()
            .map(|s| MediaSegment {
                start_secs: s.start,
                end_secs: s.end,
                text: s.text,
            })
            .collect();

        let duration_secs = result
            .duration
            .or_else(|| segments.last().map(|s| s.end_secs))
            .unwrap_or(0.0);

        Ok(TranscriptionResult {
            text: result.text,
            language: result.language,
            duration_secs,
            confidence,
            segments,
        })
    }

    fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
