//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` (or the path in `PARLEY_CONFIG`) as
//! a persistent config source. All fields are optional; the file is a
//! partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Priming message placed at the head of the conversation
    #[serde(default)]
    pub seed_prompt: Option<String>,

    /// Role of the priming message ("assistant" or "system")
    #[serde(default)]
    pub seed_role: Option<String>,

    /// Directory for transient audio files
    #[serde(default)]
    pub scratch_dir: Option<String>,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Transcription configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Request streamed replies and aggregate them
    pub stream: Option<bool>,
    /// Retries for transient failures
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    /// Override the `OpenAI` API root (e.g. a compatible proxy)
    pub base_url: Option<String>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    /// STT model (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "google" or "openai"
    pub provider: Option<String>,
    /// Language code for Google TTS (e.g. "en")
    pub language: Option<String>,
    /// TTS model for `OpenAI` (e.g. "tts-1")
    pub model: Option<String>,
    /// TTS voice identifier for `OpenAI` (e.g. "alloy")
    pub voice: Option<String>,
    /// TTS speed multiplier for `OpenAI`
    pub speed: Option<f32>,
    pub timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Address to bind
    pub host: Option<String>,
    /// API server port
    pub port: Option<u16>,
    /// Directory holding a web client to serve
    pub static_dir: Option<String>,
}

/// Load the TOML config file from `PARLEY_CONFIG` or the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = std::env::var("PARLEY_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path)
    else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<ParleyConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: ParleyConfigFile = toml::from_str(
            r#"
            seed_prompt = "You are terse."

            [llm]
            model = "gpt-4o"
            temperature = 0.7
            stream = true

            [tts]
            provider = "openai"
            voice = "nova"
            "#,
        )
        .unwrap();

        assert_eq!(fc.seed_prompt.as_deref(), Some("You are terse."));
        assert_eq!(fc.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(fc.llm.stream, Some(true));
        assert_eq!(fc.tts.voice.as_deref(), Some("nova"));
        assert!(fc.server.port.is_none());
        assert!(fc.api_keys.openai.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let fc: ParleyConfigFile = toml::from_str("").unwrap();
        assert!(fc.llm.model.is_none());
        assert!(fc.stt.provider.is_none());
    }

    #[test]
    fn read_reports_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm\nmodel = 1").unwrap();
        assert!(read_config_file(&path).is_err());
    }
}
