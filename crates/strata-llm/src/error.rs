//! Error types for the chat client

use thiserror::Error;

/// Result alias used throughout the client
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors produced while talking to a chat-completion endpoint
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid or incomplete client configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Transport-level failure (connect, timeout, body read)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Base URL could not be parsed or joined
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl LlmError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether the error came from the remote side rather than local setup
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Api { .. } | Self::InvalidResponse { .. })
    }
}
