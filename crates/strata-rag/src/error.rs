//! # Error types
//!
//! A single error enum covers every subsystem. Most variants are never
//! surfaced to the top level: the engine converts store, network and
//! corruption failures into degraded behaviour at the call site. The only
//! hard failure callers are expected to handle is [`StrataError::ModelLoad`].

use thiserror::Error;

/// Result alias used across the crate
pub type StrataResult<T> = Result<T, StrataError>;

/// Errors produced by the engine
#[derive(Debug, Error)]
pub enum StrataError {
    /// The persistence layer failed to open or was closed
    #[error("store '{store}' unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },

    /// A storage backend operation failed
    #[error("storage operation '{operation}' failed: {source}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote call failed (timeout, non-2xx, malformed body)
    #[error("network error during {operation}: {message}")]
    Network {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// Embedding could not be produced
    #[error("embedding error: {message}")]
    Embedding { message: String },

    /// Local model could not be loaded after all recovery attempts
    #[error("failed to load model '{model}': {message}")]
    ModelLoad { model: String, message: String },

    /// Input failed validation
    #[error("validation failed for {field}: {constraint} (got {value})")]
    Validation {
        field: String,
        constraint: String,
        value: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chat-completion client failure
    #[cfg(feature = "llm-descriptions")]
    #[error("llm error during {operation}: {source}")]
    Llm {
        operation: String,
        #[source]
        source: strata_llm::LlmError,
    },
}

impl StrataError {
    /// Create a store-unavailable error
    pub fn unavailable(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            store: store.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a network error
    pub fn network(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Network {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a model load error
    pub fn model_load(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap a chat client error
    #[cfg(feature = "llm-descriptions")]
    pub fn llm(operation: impl Into<String>, source: strata_llm::LlmError) -> Self {
        Self::Llm {
            operation: operation.into(),
            source,
        }
    }

    /// Check if the store was unavailable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Check if this is a network failure
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

impl From<sled::Error> for StrataError {
    fn from(err: sled::Error) -> Self {
        Self::storage("sled", err)
    }
}

impl From<config::ConfigError> for StrataError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for StrataError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let operation = if err.is_timeout() { "timeout" } else { "http" };
        Self::network(operation, status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StrataError::unavailable("tiered-context", "lock held");
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("tiered-context"));

        let err = StrataError::network("embed", Some(500), "boom");
        assert!(err.is_network());
        assert!(err.to_string().contains("boom"));

        let err = StrataError::validation("top_k", "must be positive", "0");
        assert!(err.to_string().contains("top_k"));
    }
}
