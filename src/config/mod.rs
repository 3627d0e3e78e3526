//! Configuration management for Parley gateway
//!
//! Values come from the environment, then the TOML config file, then
//! defaults. Credentials are checked up front so a missing key stops the
//! process at startup instead of failing the first request.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::conversation::{DEFAULT_SEED_PROMPT, Role, Turn};
use crate::llm::CompletionOptions;
use crate::voice::{SttProvider, TtsProvider};
use crate::{Error, Result};

pub use file::{ParleyConfigFile, config_file_path, load_config_file};

/// Parley gateway configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Chat completion configuration
    pub completion: CompletionConfig,

    /// Speech-to-text configuration
    pub transcription: TranscriptionConfig,

    /// Text-to-speech configuration
    pub synthesis: SynthesisConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// `OpenAI` API root override (`OPENAI_BASE_URL`)
    pub openai_base_url: Option<String>,

    /// First turn of the conversation
    pub seed: Turn,

    /// Directory for transient audio files (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web client)
    pub static_dir: Option<PathBuf>,
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model and sampling options
    pub options: CompletionOptions,

    /// Per-attempt time budget
    pub timeout: Duration,

    /// Retries for transient failures (0 disables)
    pub max_retries: u32,
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub model: String,

    pub timeout: Duration,
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub provider: TtsProvider,

    /// Language code for synthesized speech
    pub language: String,

    /// TTS model for `OpenAI` (e.g. "tts-1")
    pub model: String,

    /// TTS voice identifier for `OpenAI`
    pub voice: String,

    /// TTS speed multiplier for `OpenAI` (0.25 to 4.0)
    pub speed: f32,

    pub timeout: Duration,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper, TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or a required key is missing
    pub fn load() -> Result<Self> {
        let fc = load_config_file();
        Self::from_sources(|key| std::env::var(key).ok(), fc)
    }

    /// Build configuration from an environment lookup and a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or a required key is missing
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        fc: ParleyConfigFile,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
        };

        // Server config (env > toml > default)
        let port = match env("PARLEY_PORT").or_else(|| env("PORT")) {
            Some(raw) => parse_var("PARLEY_PORT", &raw)?,
            None => fc.server.port.unwrap_or(5000),
        };
        let server = ServerConfig {
            host: env("PARLEY_HOST")
                .or(fc.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            static_dir: env("PARLEY_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
        };

        let options = CompletionOptions {
            model: env("PARLEY_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| CompletionOptions::default().model),
            max_output_tokens: opt_var(&env, "PARLEY_MAX_TOKENS")?.or(fc.llm.max_tokens),
            temperature: opt_var(&env, "PARLEY_TEMPERATURE")?.or(fc.llm.temperature),
            top_p: opt_var(&env, "PARLEY_TOP_P")?.or(fc.llm.top_p),
            stream: opt_var(&env, "PARLEY_STREAM")?
                .or(fc.llm.stream)
                .unwrap_or(false),
        };
        let completion = CompletionConfig {
            options,
            timeout: Duration::from_secs(
                opt_var(&env, "PARLEY_LLM_TIMEOUT_SECS")?
                    .or(fc.llm.timeout_secs)
                    .unwrap_or(60),
            ),
            max_retries: opt_var(&env, "PARLEY_LLM_RETRIES")?
                .or(fc.llm.max_retries)
                .unwrap_or(0),
        };

        let transcription = TranscriptionConfig {
            provider: env("PARLEY_STT_PROVIDER")
                .or(fc.stt.provider)
                .map_or(Ok(SttProvider::Whisper), |p| p.parse())?,
            model: env("PARLEY_STT_MODEL").or(fc.stt.model).unwrap_or_default(),
            timeout: Duration::from_secs(
                opt_var(&env, "PARLEY_STT_TIMEOUT_SECS")?
                    .or(fc.stt.timeout_secs)
                    .unwrap_or(60),
            ),
        };
        let transcription = TranscriptionConfig {
            model: if transcription.model.is_empty() {
                default_stt_model(transcription.provider).to_string()
            } else {
                transcription.model
            },
            ..transcription
        };

        let synthesis = SynthesisConfig {
            provider: env("PARLEY_TTS_PROVIDER")
                .or(fc.tts.provider)
                .map_or(Ok(TtsProvider::Google), |p| p.parse())?,
            language: env("PARLEY_TTS_LANGUAGE")
                .or(fc.tts.language)
                .unwrap_or_else(|| "en".to_string()),
            model: env("PARLEY_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: env("PARLEY_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            timeout: Duration::from_secs(
                opt_var(&env, "PARLEY_TTS_TIMEOUT_SECS")?
                    .or(fc.tts.timeout_secs)
                    .unwrap_or(30),
            ),
        };

        let seed_role = env("PARLEY_SEED_ROLE")
            .or(fc.seed_role)
            .map_or(Ok(Role::Assistant), |r| r.parse())?;
        if seed_role == Role::User {
            return Err(Error::Config("seed turn must be a system or assistant message".to_string()));
        }
        let seed = Turn::new(
            seed_role,
            env("PARLEY_SEED_PROMPT")
                .or(fc.seed_prompt)
                .unwrap_or_else(|| DEFAULT_SEED_PROMPT.to_string()),
        );

        let config = Self {
            server,
            completion,
            transcription,
            synthesis,
            api_keys,
            openai_base_url: env("OPENAI_BASE_URL").or(fc.llm.base_url),
            seed,
            scratch_dir: env("PARLEY_SCRATCH_DIR")
                .or(fc.scratch_dir)
                .map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check option ranges and that every configured provider has credentials
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        self.completion.options.validate()?;

        if !(0.25..=4.0).contains(&self.synthesis.speed) {
            return Err(Error::Config(format!(
                "TTS speed must be within [0.25, 4.0], got {}",
                self.synthesis.speed
            )));
        }

        if self.synthesis.language.trim().is_empty() {
            return Err(Error::Config("TTS language must not be empty".to_string()));
        }

        // Chat completion always goes through OpenAI
        if !has_key(self.api_keys.openai.as_ref()) {
            return Err(Error::Config(
                "OPENAI_API_KEY is not set (required for chat completion)".to_string(),
            ));
        }

        if self.transcription.provider == SttProvider::Deepgram
            && !has_key(self.api_keys.deepgram.as_ref())
        {
            return Err(Error::Config(
                "DEEPGRAM_API_KEY is not set (required by the deepgram STT provider)".to_string(),
            ));
        }

        Ok(())
    }

    /// Socket address string to bind
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn has_key(key: Option<&SecretString>) -> bool {
    key.is_some_and(|k| !k.expose_secret().trim().is_empty())
}

const fn default_stt_model(provider: SttProvider) -> &'static str {
    match provider {
        SttProvider::Whisper => "whisper-1",
        SttProvider::Deepgram => "nova-2",
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key} ({raw:?}): {e}")))
}

fn opt_var<T: std::str::FromStr>(env: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env(key).map(|raw| parse_var(key, &raw)).transpose()
}
