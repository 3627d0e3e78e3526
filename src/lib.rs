//! Parley Gateway - a minimal voice-assistant backend
//!
//! This library provides the core functionality for the Parley gateway:
//! - A shared conversation history fed to a chat completion API
//! - Speech-to-text for uploaded audio and text-to-speech for replies
//! - HTTP and WebSocket transports over one request orchestrator
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Transports                        │
//! │   HTTP (speech, audio, synthesis)  │  WebSocket     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                        │
//! │   Conversation state  │  Transcribe  │  Complete    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Provider adapters                     │
//! │   OpenAI chat  │  Whisper / Deepgram  │  Google TTS │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod retry;
pub mod scratch;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationState, Role, Turn};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use llm::{ChatBackend, CompletionAdapter, CompletionOptions};
pub use orchestrator::{AudioReply, Orchestrator};
pub use scratch::{ScratchDir, ScratchFile};
pub use voice::{
    AudioFormat, SynthesisAdapter, SynthesizedAudio, Synthesizer, Transcriber, TranscriptionAdapter,
};
