//! Error types for Parley gateway

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Parley gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or empty input at the boundary
    #[error("{0}")]
    InvalidInput(String),

    /// Provider call failed (auth, rate limit, network, malformed response)
    #[error("{0}")]
    Upstream(String),

    /// Provider answered with a non-success HTTP status
    #[error("{message}")]
    UpstreamStatus { status: u16, message: String },

    /// Temporary file could not be created, written or removed
    #[error("resource error: {0}")]
    Resource(String),

    /// Provider call exceeded its time budget
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build an upstream error from any displayable provider failure
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Build an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether the failure originated at a third-party provider
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_) | Self::UpstreamStatus { .. } | Self::Timeout { .. } | Self::Http(_)
        )
    }

    /// Whether the caller supplied bad input
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Whether a retry has a reasonable chance of succeeding
    ///
    /// Rate limits, server errors, timeouts and connection failures are
    /// transient; auth and validation failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| crate::retry::is_recoverable(s.as_u16(), ""))
            }
            Self::UpstreamStatus { status, message } => crate::retry::is_recoverable(*status, message),
            Self::Upstream(msg) => crate::retry::is_recoverable_message(msg),
            _ => false,
        }
    }
}
