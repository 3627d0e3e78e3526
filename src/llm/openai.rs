//! `OpenAI` chat-completions backend

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatBackend, CompletionOptions, FragmentStream};
use crate::conversation::Turn;
use crate::{Error, Result};

/// Default API root
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat completions over the `OpenAI` HTTP API
pub struct OpenAiChat {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiChat {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, base_url: Option<String>) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat completion".to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn send(&self, turns: &[Turn], options: &CompletionOptions, stream: bool) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &options.model,
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            max_tokens: options.max_output_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat completion request failed");
                Error::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI API error");
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                message: format!("OpenAI API error {status}: {}", api_error_message(&body)),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String> {
        let response = self.send(turns, options, false).await?;

        let result: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat completion response");
            Error::Upstream(format!("malformed chat completion response: {e}"))
        })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Upstream("chat completion returned no content".to_string()))
    }

    async fn complete_stream(
        &self,
        turns: &[Turn],
        options: &CompletionOptions,
    ) -> Result<FragmentStream> {
        let response = self.send(turns, options, true).await?;
        Ok(fragments(Box::pin(response.bytes_stream())))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Decode a streamed completion body into reply fragments
fn fragments<S, B>(bytes: S) -> FragmentStream
where
    S: futures::Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.exhausted || st.decoder.is_done() {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.decoder.push(chunk.as_ref())),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "error reading completion stream");
                    st.exhausted = true;
                    st.pending
                        .push_back(Err(Error::Upstream(format!("completion stream read error: {e}"))));
                }
                None => {
                    st.exhausted = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    }))
}

/// Body chunks of a streamed completion, decoded as they arrive
struct StreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    exhausted: bool,
}

/// Incremental decoder for the server-sent-events body of a streamed completion
///
/// Bytes may arrive split anywhere, including mid-line or mid-codepoint, so
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes, returning the text fragments completed by them
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while !self.done {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = self.decode_line(&line) {
                out.push(item);
            }
        }
        out
    }

    /// Flush a trailing line not terminated by a newline
    pub(crate) fn finish(&mut self) -> Vec<Result<String>> {
        if self.done || self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    /// Whether the `[DONE]` sentinel has been seen
    pub(crate) const fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<Result<String>> {
        let line = String::from_utf8_lossy(raw);
        let data = line.trim().strip_prefix("data:")?.trim();

        if data == "[DONE]" {
            tracing::trace!("completion stream finished");
            self.done = true;
            return None;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|s| !s.is_empty())
                .map(Ok),
            Err(e) => {
                if let Some(message) = serde_json::from_str::<ApiErrorBody>(data)
                    .ok()
                    .map(|b| b.error.message)
                {
                    return Some(Err(Error::Upstream(message)));
                }
                tracing::warn!(error = %e, data = %data, "skipping unparseable stream event");
                None
            }
        }
    }
}

/// Extract `error.message` from an `OpenAI` error body, falling back to the raw body
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(content: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{content}\"}}}}]}}\n\n")
    }

    fn texts(items: Vec<Result<String>>) -> Vec<String> {
        items.into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn decodes_fragments_in_order() {
        let mut decoder = SseDecoder::default();
        let body = format!("{}{}data: [DONE]\n\n", event("Hel"), event("lo!"));

        assert_eq!(texts(decoder.push(body.as_bytes())), vec!["Hel", "lo!"]);
        assert!(decoder.is_done());
    }

    #[test]
    fn handles_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let body = event("split");
        let (a, b) = body.as_bytes().split_at(9);

        assert!(decoder.push(a).is_empty());
        assert_eq!(texts(decoder.push(b)), vec!["split"]);
    }

    #[test]
    fn handles_codepoints_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let body = event("héllo");
        let cut = body.find('é').unwrap() + 1;
        let (a, b) = body.as_bytes().split_at(cut);

        assert!(decoder.push(a).is_empty());
        assert_eq!(texts(decoder.push(b)), vec!["héllo"]);
    }

    #[test]
    fn skips_role_only_and_comment_events() {
        let mut decoder = SseDecoder::default();
        let body = ": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        assert!(decoder.push(body.as_bytes()).is_empty());
    }

    #[test]
    fn ignores_everything_after_done() {
        let mut decoder = SseDecoder::default();
        let body = format!("data: [DONE]\n\n{}", event("late"));
        assert!(decoder.push(body.as_bytes()).is_empty());
    }

    #[test]
    fn flushes_unterminated_final_line() {
        let mut decoder = SseDecoder::default();
        let body = event("tail");
        assert!(decoder.push(body.trim_end().as_bytes()).is_empty());
        assert_eq!(texts(decoder.finish()), vec!["tail"]);
    }

    #[test]
    fn surfaces_inline_error_events() {
        let mut decoder = SseDecoder::default();
        let items = decoder.push(b"data: {\"error\":{\"message\":\"rate limited\"}}\n");
        assert_eq!(items.len(), 1);
        assert_eq!(items.into_iter().next().unwrap().unwrap_err().to_string(), "rate limited");
    }

    #[test]
    fn extracts_api_error_message() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        assert_eq!(api_error_message(body), "Rate limit reached");
        assert_eq!(api_error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn request_omits_unset_options() {
        let turns = [Turn::user("hi")];
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            max_tokens: None,
            temperature: Some(0.7),
            top_p: None,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("stream").is_none());
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn rejects_blank_api_key() {
        assert!(OpenAiChat::new(SecretString::from("  ".to_string()), None).is_err());
    }

    #[tokio::test]
    async fn body_chunks_become_fragments() {
        let body = format!("{}{}data: [DONE]\n\n", event("Hel"), event("lo"));
        let (head, tail) = body.as_bytes().split_at(20);
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![Ok(head.to_vec()), Ok(tail.to_vec())];

        let stream = fragments(futures::stream::iter(chunks));
        let collected: Vec<Result<String>> = stream.collect().await;

        assert_eq!(texts(collected), vec!["Hel", "lo"]);
    }
}
