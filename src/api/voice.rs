//! Voice API endpoints: chat, audio chat and speech synthesis

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::Error;
use crate::orchestrator::AudioReply;
use crate::voice::AudioFormat;

/// Largest accepted upload (the Whisper API limit)
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/process-speech", post(process_speech))
        .route("/process-audio", post(process_audio))
        .route("/synthesize-speech", post(synthesize_speech))
        .layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES))
        .with_state(state)
}

/// Text request body; a missing `text` is treated as empty
#[derive(Debug, Default, Deserialize)]
pub struct TextRequest {
    #[serde(default)]
    pub text: String,
}

/// Chat reply
#[derive(Debug, Serialize)]
pub struct SpeechResponse {
    pub response: String,
}

/// Send user text through the conversation and return the reply
async fn process_speech(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<SpeechResponse>, VoiceError> {
    let Json(request) = payload.map_err(|e| VoiceError::BadRequest(e.body_text()))?;

    let response = state
        .orchestrator
        .receive_text(&request.text)
        .await
        .map_err(|e| VoiceError::ChatFailed(e.to_string()))?;

    Ok(Json(SpeechResponse { response }))
}

/// Transcribe an uploaded `file` and answer it
///
/// The format is taken from the upload's file name or content type.
async fn process_audio(
    State(state): State<Arc<ApiState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AudioReply>, VoiceError> {
    let Ok(mut multipart) = multipart else {
        return Err(VoiceError::NoFile);
    };

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| VoiceError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let format = AudioFormat::from_upload(field.file_name(), field.content_type());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| VoiceError::BadRequest(e.body_text()))?;
        upload = Some((bytes, format));
        break;
    }

    let Some((audio, format)) = upload else {
        return Err(VoiceError::NoFile);
    };

    tracing::debug!(bytes = audio.len(), %format, "received audio upload");

    let reply = state
        .orchestrator
        .receive_audio(&audio, format)
        .await
        .map_err(|e| match e {
            Error::InvalidInput(msg) => VoiceError::BadRequest(msg),
            other => VoiceError::Failed(other.to_string()),
        })?;

    Ok(Json(reply))
}

/// Synthesize text to speech
///
/// Streams MP3 audio from a scratch file that is removed once the body has
/// been sent or the client goes away.
async fn synthesize_speech(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Response, VoiceError> {
    let Json(request) = payload.map_err(|e| VoiceError::BadRequest(e.body_text()))?;

    let audio = state
        .orchestrator
        .synthesize(&request.text)
        .await
        .map_err(|e| match e {
            Error::InvalidInput(msg) => VoiceError::BadRequest(msg),
            e if e.is_upstream() => VoiceError::SynthesisFailed(e.to_string()),
            other => VoiceError::Failed(other.to_string()),
        })?;

    let media_type = audio.media_type();
    let len = audio.len();
    let stream = audio
        .into_stream()
        .await
        .map_err(|e| VoiceError::Failed(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, media_type.to_string()),
            (header::CONTENT_DISPOSITION, "inline; filename=response.mp3".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    /// Multipart body without a `file` field
    NoFile,
    BadRequest(String),
    /// Completion failed on the text path
    ChatFailed(String),
    SynthesisFailed(String),
    Failed(String),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        #[derive(Serialize)]
        struct ChatErrorResponse {
            response: String,
        }

        let (status, error) = match self {
            Self::ChatFailed(msg) => {
                tracing::error!(error = %msg, "chat completion failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ChatErrorResponse {
                        response: format!("Error calling ChatCompletion: {msg}"),
                    }),
                )
                    .into_response();
            }
            Self::NoFile => (StatusCode::BAD_REQUEST, "No file provided".to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::SynthesisFailed(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Failed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %error, "voice request failed");
        }

        (status, Json(ErrorResponse { error })).into_response()
    }
}
