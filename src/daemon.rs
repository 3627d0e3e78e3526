//! Daemon - the main gateway service
//!
//! Builds the providers and adapters described by [`Config`], wires them into
//! one [`Orchestrator`] and serves it over HTTP and WebSocket.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::api::ApiServerBuilder;
use crate::llm::{CompletionAdapter, OpenAiChat};
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use crate::scratch::ScratchDir;
use crate::voice::{
    SpeechToText, SttProvider, SynthesisAdapter, TextToSpeech, TranscriptionAdapter, TtsProvider,
};
use crate::{Config, Error, Result};

/// The Parley daemon - owns the orchestrator and the API server
pub struct Daemon {
    config: Config,
    orchestrator: Arc<Orchestrator>,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if a provider cannot be initialized
    pub fn new(config: Config) -> Result<Self> {
        let orchestrator = Arc::new(build_orchestrator(&config)?);
        Ok(Self { config, orchestrator })
    }

    /// Shared orchestrator (used by the one-shot CLI commands)
    #[must_use]
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails to bind or run
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            addr = %self.config.bind_addr(),
            model = %self.config.completion.options.model,
            stt = %self.config.transcription.provider,
            tts = %self.config.synthesis.provider,
            "starting parley gateway"
        );

        ApiServerBuilder::new(self.orchestrator)
            .host(self.config.server.host)
            .port(self.config.server.port)
            .static_dir(self.config.server.static_dir)
            .build()
            .run()
            .await
    }
}

/// Build the orchestrator and its adapters from configuration
///
/// # Errors
///
/// Returns error if a required credential is missing or a client cannot be built
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let scratch = config
        .scratch_dir
        .as_ref()
        .map_or_else(ScratchDir::system, ScratchDir::at);

    let chat = OpenAiChat::new(openai_key(config)?, config.openai_base_url.clone())?;
    let completion = CompletionAdapter::new(Arc::new(chat), config.completion.options.clone())
        .with_timeout(config.completion.timeout)
        .with_retry(RetryPolicy::with_retries(config.completion.max_retries));

    let stt = match config.transcription.provider {
        SttProvider::Whisper => SpeechToText::new_whisper(
            openai_key(config)?,
            config.transcription.model.clone(),
            config.openai_base_url.clone(),
        )?,
        SttProvider::Deepgram => {
            let key = config
                .api_keys
                .deepgram
                .as_ref()
                .map(copy_secret)
                .ok_or_else(|| Error::Config("DEEPGRAM_API_KEY is not set".to_string()))?;
            SpeechToText::new_deepgram(key, config.transcription.model.clone())?
        }
    };
    tracing::info!(provider = %config.transcription.provider, model = %config.transcription.model, "STT initialized");
    let transcription = TranscriptionAdapter::new(Arc::new(stt), scratch.clone())
        .with_timeout(config.transcription.timeout);

    let tts = match config.synthesis.provider {
        TtsProvider::Google => TextToSpeech::new_google(),
        TtsProvider::OpenAI => TextToSpeech::new_openai_with_model(
            openai_key(config)?,
            config.synthesis.voice.clone(),
            config.synthesis.speed,
            config.synthesis.model.clone(),
            config.openai_base_url.clone(),
        )?,
    };
    tracing::info!(provider = %config.synthesis.provider, language = %config.synthesis.language, "TTS initialized");
    let synthesis = SynthesisAdapter::new(Arc::new(tts), scratch)
        .with_language(config.synthesis.language.clone())
        .with_timeout(config.synthesis.timeout);

    Ok(Orchestrator::new(
        config.seed.clone(),
        completion,
        transcription,
        synthesis,
    ))
}

fn openai_key(config: &Config) -> Result<SecretString> {
    config
        .api_keys
        .openai
        .as_ref()
        .map(copy_secret)
        .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}
