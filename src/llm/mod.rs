//! Chat completion
//!
//! A [`ChatBackend`] turns an ordered list of turns into reply text, either in
//! one piece or as a lazy stream of fragments. [`CompletionAdapter`] sits in
//! front of a backend: it applies the configured options, bounds each call by
//! a timeout and a retry policy, and folds streamed fragments into one string
//! so callers never see partial output.

mod openai;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

pub use openai::{OPENAI_BASE_URL, OpenAiChat};

use crate::conversation::Turn;
use crate::retry::{self, RetryPolicy};
use crate::{Error, Result};

/// Lazy, finite, non-restartable sequence of reply fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Generation options passed to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    /// Model identifier
    pub model: String,
    /// Upper bound on generated tokens
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature in `[0, 2]`
    pub temperature: Option<f32>,
    /// Nucleus sampling mass in `[0, 1]`
    pub top_p: Option<f32>,
    /// Request a fragment stream instead of a single reply
    pub stream: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            stream: false,
        }
    }
}

impl CompletionOptions {
    /// Check the numeric options are within the ranges providers accept
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first out-of-range option
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("completion model must not be empty".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Config(format!("temperature must be within [0, 2], got {t}")));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Config(format!("top_p must be within [0, 1], got {p}")));
            }
        }
        if self.max_output_tokens == Some(0) {
            return Err(Error::Config("max_output_tokens must be positive".to_string()));
        }
        Ok(())
    }
}

/// Chat-completion capability
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Generate a full reply for `turns`
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String>;

    /// Generate a reply as a stream of fragments
    async fn complete_stream(
        &self,
        turns: &[Turn],
        options: &CompletionOptions,
    ) -> Result<FragmentStream>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// Concatenate every fragment in arrival order
///
/// Returns only after the stream is exhausted; the first failed fragment
/// aborts the fold.
///
/// # Errors
///
/// Returns the first error yielded by the stream
pub async fn collect_fragments(mut fragments: FragmentStream) -> Result<String> {
    let mut reply = String::new();
    let mut count = 0usize;
    while let Some(fragment) = fragments.next().await {
        reply.push_str(&fragment?);
        count += 1;
    }
    tracing::trace!(fragments = count, chars = reply.len(), "collected streamed reply");
    Ok(reply)
}

/// Completion capability with options, timeout and retry applied
#[derive(Clone)]
pub struct CompletionAdapter {
    backend: Arc<dyn ChatBackend>,
    options: CompletionOptions,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CompletionAdapter {
    /// Wrap a backend with default timeout and no retries
    pub fn new(backend: Arc<dyn ChatBackend>, options: CompletionOptions) -> Self {
        Self {
            backend,
            options,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::none(),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &CompletionOptions {
        &self.options
    }

    /// Generate a reply for `turns` using the configured options
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] or [`Error::Timeout`] if the provider fails
    pub async fn complete(&self, turns: &[Turn]) -> Result<String> {
        self.complete_with(turns, &self.options).await
    }

    /// Generate a reply for `turns` with explicit options
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] or [`Error::Timeout`] if the provider fails
    pub async fn complete_with(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String> {
        tracing::debug!(
            provider = self.backend.name(),
            model = %options.model,
            turns = turns.len(),
            stream = options.stream,
            "requesting completion"
        );

        let reply = retry::run(&self.retry, "completion", self.timeout, || async move {
            if options.stream {
                let fragments = self.backend.complete_stream(turns, options).await?;
                collect_fragments(fragments).await
            } else {
                self.backend
                    .complete(turns, options)
                    .await
                    .map(|text| text.trim().to_string())
            }
        })
        .await
        .map_err(into_upstream)?;

        tracing::debug!(provider = self.backend.name(), chars = reply.len(), "completion finished");
        Ok(reply)
    }
}

/// Collapse transport-level failures into the upstream category
fn into_upstream(e: Error) -> Error {
    match e {
        Error::Http(err) => Error::Upstream(format!("completion request failed: {err}")),
        Error::Serialization(err) => Error::Upstream(format!("malformed provider response: {err}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Scripted {
        fragments: Vec<&'static str>,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn complete(&self, turns: &[Turn], _options: &CompletionOptions) -> Result<String> {
            self.seen.lock().unwrap().push(turns.to_vec());
            Ok(format!("  {}  \n", self.fragments.concat()))
        }

        async fn complete_stream(
            &self,
            turns: &[Turn],
            _options: &CompletionOptions,
        ) -> Result<FragmentStream> {
            self.seen.lock().unwrap().push(turns.to_vec());
            let items: Vec<Result<String>> =
                self.fragments.iter().map(|s| Ok((*s).to_string())).collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn scripted(fragments: Vec<&'static str>) -> Arc<Scripted> {
        Arc::new(Scripted {
            fragments,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn streamed_fragments_are_concatenated_exactly() {
        let backend = scripted(vec!["Hel", "lo!"]);
        let options = CompletionOptions {
            stream: true,
            ..CompletionOptions::default()
        };
        let adapter = CompletionAdapter::new(backend.clone(), options);

        let reply = adapter.complete(&[Turn::user("hi")]).await.unwrap();
        assert_eq!(reply, "Hello!");
        assert_eq!(backend.seen.lock().unwrap()[0], vec![Turn::user("hi")]);
    }

    #[tokio::test]
    async fn streamed_whitespace_is_preserved() {
        let adapter = CompletionAdapter::new(
            scripted(vec![" a", " b "]),
            CompletionOptions {
                stream: true,
                ..CompletionOptions::default()
            },
        );
        assert_eq!(adapter.complete(&[]).await.unwrap(), " a b ");
    }

    #[tokio::test]
    async fn single_reply_is_trimmed() {
        let adapter = CompletionAdapter::new(scripted(vec!["Hi there!"]), CompletionOptions::default());
        assert_eq!(adapter.complete(&[]).await.unwrap(), "Hi there!");
    }

    #[tokio::test]
    async fn failed_fragment_aborts_fold() {
        let items: Vec<Result<String>> = vec![Ok("par".to_string()), Err(Error::upstream("stream reset"))];
        let err = collect_fragments(Box::pin(futures::stream::iter(items)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stream reset");
    }

    /// Fails with the queued errors, then answers
    struct Flaky {
        failures: Mutex<Vec<Error>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ChatBackend for Flaky {
        async fn complete(&self, _turns: &[Turn], _options: &CompletionOptions) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            match self.failures.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok("recovered".to_string()),
            }
        }

        async fn complete_stream(
            &self,
            turns: &[Turn],
            options: &CompletionOptions,
        ) -> Result<FragmentStream> {
            let reply = self.complete(turns, options).await?;
            Ok(Box::pin(futures::stream::iter(vec![Ok(reply)])))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn fast_retries(n: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries: n,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn server_errors_and_connect_failures_are_retried() {
        let connect_err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();
        let backend = Arc::new(Flaky {
            // popped from the back
            failures: Mutex::new(vec![
                Error::Http(connect_err),
                Error::UpstreamStatus {
                    status: 504,
                    message: "OpenAI API error 504 Gateway Timeout: upstream timed out".to_string(),
                },
                Error::UpstreamStatus {
                    status: 500,
                    message: "OpenAI API error 500 Internal Server Error: server error".to_string(),
                },
            ]),
            calls: Mutex::new(0),
        });
        let adapter = CompletionAdapter::new(backend.clone(), CompletionOptions::default())
            .with_retry(fast_retries(3));

        assert_eq!(adapter.complete(&[]).await.unwrap(), "recovered");
        assert_eq!(*backend.calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let backend = Arc::new(Flaky {
            failures: Mutex::new(vec![Error::UpstreamStatus {
                status: 401,
                message: "OpenAI API error 401 Unauthorized: Incorrect API key provided".to_string(),
            }]),
            calls: Mutex::new(0),
        });
        let adapter = CompletionAdapter::new(backend.clone(), CompletionOptions::default())
            .with_retry(fast_retries(3));

        let err = adapter.complete(&[]).await.unwrap_err();
        assert!(err.is_upstream());
        assert!(err.to_string().contains("401"));
        assert_eq!(*backend.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_connect_failure_surfaces_as_upstream() {
        let connect_err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();
        let backend = Arc::new(Flaky {
            failures: Mutex::new(vec![Error::Http(connect_err)]),
            calls: Mutex::new(0),
        });
        let adapter = CompletionAdapter::new(backend, CompletionOptions::default());

        let err = adapter.complete(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(ref msg) if msg.starts_with("completion request failed")));
    }

    #[test]
    fn options_validation_rejects_out_of_range() {
        assert!(CompletionOptions::default().validate().is_ok());

        let hot = CompletionOptions {
            temperature: Some(2.5),
            ..CompletionOptions::default()
        };
        assert!(hot.validate().is_err());

        let wide = CompletionOptions {
            top_p: Some(1.1),
            ..CompletionOptions::default()
        };
        assert!(wide.validate().is_err());

        let none = CompletionOptions {
            max_output_tokens: Some(0),
            ..CompletionOptions::default()
        };
        assert!(none.validate().is_err());
    }
}
