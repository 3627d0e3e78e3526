//! Text-to-speech (TTS) processing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};

use crate::scratch::{ScratchDir, ScratchFile};
use crate::{Error, Result};

/// Media type of every synthesized clip
pub const AUDIO_MPEG: &str = "audio/mpeg";

/// Longest text the Google endpoint accepts per request
const GOOGLE_MAX_CHARS: usize = 100;

const GOOGLE_TTS_URL: &str = "https://translate.google.com/translate_tts";

/// Synthesis capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` spoken in `language` as MP3 bytes
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    Google,
    OpenAI,
}

impl std::fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Google => "google",
            Self::OpenAI => "openai",
        })
    }
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "google" | "gtts" => Ok(Self::Google),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    voice: String,
    speed: f32,
    model: String,
    base_url: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using the Google Translate speech endpoint
    ///
    /// No credentials are needed.
    #[must_use]
    pub fn new_google() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            voice: String::new(),
            speed: 1.0,
            model: String::new(),
            base_url: GOOGLE_TTS_URL.to_string(),
            provider: TtsProvider::Google,
        }
    }

    /// Create a new TTS instance using `OpenAI` with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai_with_model(
        api_key: SecretString,
        voice: String,
        speed: f32,
        model: String,
        base_url: Option<String>,
    ) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key),
            voice,
            speed,
            model,
            base_url: base_url
                .unwrap_or_else(|| crate::llm::OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            provider: TtsProvider::OpenAI,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize using the Google Translate endpoint
    ///
    /// Text is split into short chunks; the MP3 frames of each response are
    /// concatenated into one playable stream.
    async fn synthesize_google(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        let chunks = split_for_google(text, GOOGLE_MAX_CHARS);
        let total = chunks.len();
        let mut audio = Vec::new();

        for (idx, chunk) in chunks.iter().enumerate() {
            let url = format!(
                "{}?ie=UTF-8&client=tw-ob&tl={}&q={}&total={total}&idx={idx}&textlen={}",
                self.base_url,
                urlencoding::encode(language),
                urlencoding::encode(chunk),
                chunk.chars().count(),
            );

            let response = self
                .client
                .get(&url)
                .header("Referer", "https://translate.google.com/")
                .header("User-Agent", concat!("parley/", env!("CARGO_PKG_VERSION")))
                .send()
                .await
                .map_err(|e| Error::Upstream(format!("Google TTS request failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Upstream(format!("Google TTS error {status}: {body}")));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::Upstream(format!("Google TTS read failed: {e}")))?;
            audio.extend_from_slice(&bytes);
        }

        tracing::debug!(chunks = total, bytes = audio.len(), language, "Google TTS complete");
        Ok(audio)
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("OpenAI TTS request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Upstream(format!("OpenAI TTS read failed: {e}")))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::Google => self.synthesize_google(text, language).await,
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
        }
    }

    fn name(&self) -> &'static str {
        match self.provider {
            TtsProvider::Google => "google",
            TtsProvider::OpenAI => "openai",
        }
    }
}

/// Split text into chunks of at most `max_chars` characters on word boundaries
///
/// Words longer than `max_chars` are cut on character boundaries.
fn split_for_google(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Synthesized clip waiting in a scratch file
#[derive(Debug)]
pub struct SynthesizedAudio {
    file: ScratchFile,
    len: u64,
}

impl SynthesizedAudio {
    /// Always `audio/mpeg`
    #[must_use]
    pub const fn media_type(&self) -> &'static str {
        AUDIO_MPEG
    }

    /// Size of the clip in bytes
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Location of the backing scratch file
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Stream the clip; the scratch file is removed when the stream is dropped
    ///
    /// # Errors
    ///
    /// Returns an IO error if the scratch file cannot be opened
    pub async fn into_stream(
        self,
    ) -> Result<impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static> {
        self.file.into_stream().await
    }

    /// Read the whole clip into memory and release the scratch file
    ///
    /// # Errors
    ///
    /// Returns an IO error if the scratch file cannot be read
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        self.file.read().await
    }
}

/// Text to MP3 clip, staged through a scratch file for delivery
#[derive(Clone)]
pub struct SynthesisAdapter {
    backend: Arc<dyn Synthesizer>,
    scratch: ScratchDir,
    language: String,
    timeout: Duration,
}

impl SynthesisAdapter {
    pub fn new(backend: Arc<dyn Synthesizer>, scratch: ScratchDir) -> Self {
        Self {
            backend,
            scratch,
            language: "en".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Synthesize `text` in the default language
    ///
    /// # Errors
    ///
    /// See [`Self::synthesize_in`]
    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.synthesize_in(text, &self.language).await
    }

    /// Synthesize `text` in `language`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for blank text, [`Error::Upstream`] or
    /// [`Error::Timeout`] if the provider fails, and [`Error::Resource`] if
    /// the clip cannot be staged
    pub async fn synthesize_in(&self, text: &str, language: &str) -> Result<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(Error::invalid_input("Empty text"));
        }

        tracing::debug!(provider = self.backend.name(), chars = text.len(), language, "synthesizing speech");

        let audio = tokio::time::timeout(self.timeout, self.backend.synthesize(text, language))
            .await
            .map_err(|_| Error::Timeout {
                operation: "synthesis",
                after: self.timeout,
            })??;

        let file = self.scratch.write("mp3", &audio).await?;
        let len = file.size().await?;

        tracing::info!(provider = self.backend.name(), bytes = len, "speech synthesized");
        Ok(SynthesizedAudio { file, len })
    }
}
