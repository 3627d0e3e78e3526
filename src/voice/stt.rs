//! Speech-to-text (STT) processing

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::AudioFormat;
use crate::scratch::ScratchDir;
use crate::{Error, Result};

/// Transcript plus whatever metadata the provider returned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Transcription capability
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio stored at `path`
    async fn transcribe(&self, path: &Path, format: AudioFormat) -> Result<Transcription>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    #[serde(default)]
    metadata: Option<DeepgramMetadata>,
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramMetadata {
    duration: Option<f64>,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
    #[serde(default)]
    detected_language: Option<String>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl std::fmt::Display for SttProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Whisper => "whisper",
            Self::Deepgram => "deepgram",
        })
    }
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text over a provider HTTP API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: SecretString, model: String, base_url: Option<String>) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| crate::llm::OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "Deepgram API key required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: "https://api.deepgram.com/v1".to_string(),
            provider: SttProvider::Deepgram,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(&self, audio: Vec<u8>, format: AudioFormat) -> Result<Transcription> {
        tracing::debug!(audio_bytes = audio.len(), %format, "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name(format!("audio.{}", format.extension()))
                    .mime_str(format.mime())
                    .map_err(|e| Error::Upstream(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Upstream(format!("Whisper request failed: {e}"))
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Upstream(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Upstream(format!("malformed Whisper response: {e}"))
        })?;

        Ok(Transcription {
            text: result.text,
            language: result.language,
            duration_secs: result.duration,
        })
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>, format: AudioFormat) -> Result<Transcription> {
        tracing::debug!(audio_bytes = audio.len(), %format, "starting Deepgram transcription");

        let url = format!(
            "{}/listen?model={}&punctuate=true&detect_language=true",
            self.base_url,
            urlencoding::encode(&self.model)
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", format.mime())
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                Error::Upstream(format!("Deepgram request failed: {e}"))
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Upstream(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            Error::Upstream(format!("malformed Deepgram response: {e}"))
        })?;

        Ok(flatten_deepgram(result))
    }
}

fn flatten_deepgram(result: DeepgramResponse) -> Transcription {
    let channel = result.results.channels.into_iter().next();
    let language = channel.as_ref().and_then(|c| c.detected_language.clone());
    let text = channel
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default();

    Transcription {
        text,
        language,
        duration_secs: result.metadata.and_then(|m| m.duration),
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, path: &Path, format: AudioFormat) -> Result<Transcription> {
        let audio = tokio::fs::read(path).await.map_err(|e| {
            Error::Resource(format!("failed to read audio from {}: {e}", path.display()))
        })?;

        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio, format).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio, format).await,
        }
    }

    fn name(&self) -> &'static str {
        match self.provider {
            SttProvider::Whisper => "whisper",
            SttProvider::Deepgram => "deepgram",
        }
    }
}

/// Audio bytes to trimmed transcript, buffered through a scratch file
#[derive(Clone)]
pub struct TranscriptionAdapter {
    backend: Arc<dyn Transcriber>,
    scratch: ScratchDir,
    timeout: Duration,
}

impl TranscriptionAdapter {
    pub fn new(backend: Arc<dyn Transcriber>, scratch: ScratchDir) -> Self {
        Self {
            backend,
            scratch,
            timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transcribe `audio`, returning only the trimmed text
    ///
    /// The scratch file backing the call is removed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty audio, [`Error::Resource`] if
    /// the scratch file cannot be written, and [`Error::Upstream`] or
    /// [`Error::Timeout`] if the provider fails
    pub async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::invalid_input("Empty audio data"));
        }

        let file = self.scratch.write(format.extension(), audio).await?;

        let transcription = tokio::time::timeout(self.timeout, self.backend.transcribe(file.path(), format))
            .await
            .map_err(|_| Error::Timeout {
                operation: "transcription",
                after: self.timeout,
            })??;

        drop(file);

        tracing::info!(
            provider = self.backend.name(),
            transcript = %transcription.text,
            language = ?transcription.language,
            "transcription complete"
        );
        Ok(transcription.text.trim().to_string())
    }
}
