//! Per-interaction flow: transcribe, record the user turn, complete, record
//! the reply
//!
//! The orchestrator is the only owner of the [`ConversationState`]. Every
//! caller, HTTP or WebSocket, shares the same history.
//!
//! The state lock is held while the user turn is appended and the prompt is
//! snapshotted, and again while the reply is appended, but not across the
//! provider call. Two overlapping interactions therefore cannot corrupt the
//! list, though their turns may interleave (user A, user B, assistant A,
//! assistant B).
//!
//! A failed completion leaves its user turn in place with no reply; the next
//! prompt includes it verbatim.

use tokio::sync::Mutex;

use crate::conversation::{ConversationState, Role, Turn};
use crate::llm::CompletionAdapter;
use crate::voice::{AudioFormat, SynthesisAdapter, SynthesizedAudio, TranscriptionAdapter};
use crate::{Error, Result};

/// Result of the audio path
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AudioReply {
    pub transcription: String,
    pub response: String,
}

/// Runs interactions against the shared conversation
pub struct Orchestrator {
    conversation: Mutex<ConversationState>,
    completion: CompletionAdapter,
    transcription: TranscriptionAdapter,
    synthesis: SynthesisAdapter,
}

impl Orchestrator {
    pub fn new(
        seed: Turn,
        completion: CompletionAdapter,
        transcription: TranscriptionAdapter,
        synthesis: SynthesisAdapter,
    ) -> Self {
        Self {
            conversation: Mutex::new(ConversationState::new(seed)),
            completion,
            transcription,
            synthesis,
        }
    }

    /// Text path: record `user_text`, generate and record the reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] or [`Error::Timeout`] if completion fails;
    /// the user turn stays recorded
    pub async fn receive_text(&self, user_text: &str) -> Result<String> {
        self.run_turn(user_text).await
    }

    /// Audio path: transcribe, then continue as the text path
    ///
    /// Nothing is recorded if transcription fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty audio, otherwise any
    /// transcription or completion failure
    pub async fn receive_audio(&self, audio: &[u8], format: AudioFormat) -> Result<AudioReply> {
        if audio.is_empty() {
            return Err(Error::invalid_input("Empty audio data"));
        }

        let transcription = self.transcription.transcribe(audio, format).await?;
        let response = self.run_turn(&transcription).await?;

        Ok(AudioReply {
            transcription,
            response,
        })
    }

    /// Synthesize `text` without touching the conversation
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for blank text, otherwise any
    /// synthesis failure
    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.synthesis.synthesize(text).await
    }

    /// Copy of the conversation, seed first
    pub async fn snapshot(&self) -> Vec<Turn> {
        self.conversation.lock().await.snapshot()
    }

    /// Number of recorded turns including the seed
    pub async fn turn_count(&self) -> usize {
        self.conversation.lock().await.len()
    }

    async fn run_turn(&self, user_text: &str) -> Result<String> {
        let prompt = {
            let mut conversation = self.conversation.lock().await;
            conversation.append(Role::User, user_text);
            conversation.snapshot()
        };

        tracing::debug!(turns = prompt.len(), "prompting completion provider");

        let reply = match self.completion.complete(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "completion failed, user turn left without reply");
                return Err(e);
            }
        };

        self.conversation
            .lock()
            .await
            .append(Role::Assistant, reply.as_str());

        tracing::info!(reply_chars = reply.len(), "interaction complete");
        Ok(reply)
    }
}
