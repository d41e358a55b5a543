//! Client configuration

use crate::error::{LlmError, LlmResult};
use std::time::Duration;

/// Configuration for a chat-completion client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the OpenAI-compatible API (e.g. `https://api.openai.com/v1`)
    pub base_url: String,

    /// Bearer token
    pub api_key: String,

    /// Model name sent with every request
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with default generation parameters
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 300,
            temperature: 0.3,
            timeout: Duration::from_secs(30),
        }
    }

    /// Build a configuration from `STRATA_LLM_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> LlmResult<Self> {
        dotenv::dotenv().ok();

        let api_key = std::env::var("STRATA_LLM_API_KEY")
            .map_err(|_| LlmError::config("STRATA_LLM_API_KEY is not set"))?;
        let base_url = std::env::var("STRATA_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("STRATA_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let mut config = Self::new(base_url, api_key, model);
        if let Some(max_tokens) = std::env::var("STRATA_LLM_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_tokens = max_tokens;
        }
        Ok(config)
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> LlmResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::config("api_key must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(LlmError::config("model must not be empty"));
        }
        url::Url::parse(&self.base_url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("http://localhost:8080/v1", "key", "model")
            .with_max_tokens(128)
            .with_temperature(0.0);

        assert_eq!(config.max_tokens, 128);
        assert_eq!(config.temperature, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(ClientConfig::new("http://localhost", "", "m").validate().is_err());
        assert!(ClientConfig::new("not a url", "k", "m").validate().is_err());
    }
}
