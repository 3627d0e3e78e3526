//! WebSocket handler for the real-time channel
//!
//! Frames are JSON text with an `{"event": ..., "data": ...}` envelope.
//! Every connection talks to the same shared conversation as the HTTP routes.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ApiState;

/// Sent in place of a reply when completion fails
pub const FALLBACK_REPLY: &str = "Sorry, I'm having trouble generating a response.";

/// Incoming event from client
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Chat message; a missing `message` is treated as empty
    UserMessage {
        #[serde(default)]
        message: String,
    },
    /// Ping to keep connection alive
    Ping,
}

/// Outgoing event to client
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Connection established
    Connected { connection_id: String },
    /// Assistant reply
    BotResponse { message: String },
    /// Frame could not be understood
    Error { message: String },
    /// Pong response
    Pong,
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = uuid::Uuid::new_v4().to_string();

    let connected = WsOutgoing::Connected {
        connection_id: connection_id.clone(),
    };
    if let Ok(msg) = serde_json::to_string(&connected) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }

    tracing::info!(connection_id = %connection_id, "WebSocket connected");

    let (tx, mut rx) = mpsc::channel::<WsOutgoing>(32);

    // Forward events from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_connection_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = handle_message(&text, &state).await;
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %recv_connection_id, "WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(connection_id = %connection_id, "WebSocket disconnected");
}

/// Handle a single incoming frame and produce the event to emit
async fn handle_message(text: &str, state: &ApiState) -> WsOutgoing {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable frame");
            return WsOutgoing::Error {
                message: format!("invalid message: {e}"),
            };
        }
    };

    match incoming {
        WsIncoming::Ping => WsOutgoing::Pong,
        WsIncoming::UserMessage { message } => match state.orchestrator.receive_text(&message).await {
            Ok(reply) => WsOutgoing::BotResponse { message: reply },
            Err(e) => {
                tracing::error!(error = %e, "failed to generate reply");
                WsOutgoing::BotResponse {
                    message: FALLBACK_REPLY.to_string(),
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::FragmentStream;
    use crate::voice::Transcription;
    use crate::{
        AudioFormat, ChatBackend, CompletionAdapter, CompletionOptions, Error, Orchestrator, Result,
        ScratchDir, SynthesisAdapter, Synthesizer, Transcriber, TranscriptionAdapter, Turn,
    };

    /// Chat backend with a fixed outcome
    struct Chat(Option<&'static str>);

    #[async_trait]
    impl ChatBackend for Chat {
        async fn complete(&self, _turns: &[Turn], _options: &CompletionOptions) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| Error::Upstream("rate limited".to_string()))
        }

        async fn complete_stream(
            &self,
            _turns: &[Turn],
            _options: &CompletionOptions,
        ) -> Result<FragmentStream> {
            Err(Error::Upstream("streaming not scripted".to_string()))
        }

        fn name(&self) -> &'static str {
            "chat"
        }
    }

    struct Silent;

    #[async_trait]
    impl Transcriber for Silent {
        async fn transcribe(&self, _path: &Path, _format: AudioFormat) -> Result<Transcription> {
            Ok(Transcription::default())
        }

        fn name(&self) -> &'static str {
            "silent"
        }
    }

    #[async_trait]
    impl Synthesizer for Silent {
        async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "silent"
        }
    }

    fn seed() -> Turn {
        Turn::assistant("How can I help?")
    }

    fn state(reply: Option<&'static str>) -> ApiState {
        let orchestrator = Orchestrator::new(
            seed(),
            CompletionAdapter::new(Arc::new(Chat(reply)), CompletionOptions::default()),
            TranscriptionAdapter::new(Arc::new(Silent), ScratchDir::system()),
            SynthesisAdapter::new(Arc::new(Silent), ScratchDir::system()),
        );
        ApiState {
            orchestrator: Arc::new(orchestrator),
        }
    }

    const HELLO: &str = r#"{"event":"user_message","data":{"message":"Hello"}}"#;

    #[tokio::test]
    async fn user_message_gets_reply_and_grows_history() {
        let state = state(Some("Hi there!"));

        let reply = handle_message(HELLO, &state).await;

        assert!(matches!(reply, WsOutgoing::BotResponse { ref message } if message == "Hi there!"));
        assert_eq!(
            state.orchestrator.snapshot().await,
            vec![seed(), Turn::user("Hello"), Turn::assistant("Hi there!")]
        );
    }

    #[tokio::test]
    async fn completion_failure_sends_fallback_and_keeps_user_turn() {
        let state = state(None);

        let reply = handle_message(HELLO, &state).await;

        assert!(matches!(reply, WsOutgoing::BotResponse { ref message } if message == FALLBACK_REPLY));
        assert_eq!(state.orchestrator.snapshot().await, vec![seed(), Turn::user("Hello")]);
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_without_touching_history() {
        let state = state(Some("unused"));

        let reply = handle_message("not json", &state).await;

        assert!(matches!(reply, WsOutgoing::Error { ref message } if message.starts_with("invalid message")));
        assert_eq!(state.orchestrator.turn_count().await, 1);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let state = state(Some("unused"));

        let reply = handle_message(r#"{"event":"ping"}"#, &state).await;

        assert!(matches!(reply, WsOutgoing::Pong));
        assert_eq!(state.orchestrator.turn_count().await, 1);
    }

    #[test]
    fn parses_user_message() {
        let msg: WsIncoming =
            serde_json::from_str(r#"{"event":"user_message","data":{"message":"Hello"}}"#).unwrap();
        assert!(matches!(msg, WsIncoming::UserMessage { message } if message == "Hello"));
    }

    #[test]
    fn user_message_without_text_is_empty() {
        let msg: WsIncoming = serde_json::from_str(r#"{"event":"user_message","data":{}}"#).unwrap();
        assert!(matches!(msg, WsIncoming::UserMessage { message } if message.is_empty()));
    }

    #[test]
    fn parses_ping_without_data() {
        let msg: WsIncoming = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(msg, WsIncoming::Ping));
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(serde_json::from_str::<WsIncoming>(r#"{"event":"shout","data":{}}"#).is_err());
    }

    #[test]
    fn serializes_envelope() {
        let json = serde_json::to_value(WsOutgoing::BotResponse {
            message: "Hi there!".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "bot_response", "data": {"message": "Hi there!"}})
        );

        let json = serde_json::to_value(WsOutgoing::Pong).unwrap();
        assert_eq!(json, serde_json::json!({"event": "pong"}));
    }
}
