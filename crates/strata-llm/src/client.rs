//! HTTP chat-completion client

use crate::config::ClientConfig;
use crate::error::{LlmError, LlmResult};
use crate::types::{ChatCompletionBody, ChatMessage, ChatRequest, ChatResponse};
use tracing::debug;

/// Longest error body excerpt kept in [`LlmError::Api`]
const ERROR_BODY_EXCERPT: usize = 200;

/// OpenAI-compatible chat-completion client
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    config: ClientConfig,
}

impl Client {
    /// Create a new client from a validated configuration
    pub fn new(config: ClientConfig) -> LlmResult<Self> {
        config.validate()?;

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    /// Create a client from environment variables
    pub fn from_env() -> LlmResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Model used for requests
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a non-streaming chat completion and return the first choice
    pub async fn chat_completion(&self, messages: Vec<ChatMessage>) -> LlmResult<ChatResponse> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        debug!(
            endpoint = %self.endpoint,
            model = %self.config.model,
            messages = messages.len(),
            "Sending chat completion"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_EXCERPT).collect(),
            });
        }

        let body: ChatCompletionBody = response
            .json()
            .await
            .map_err(|e| LlmError::invalid_response(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::invalid_response("no choices in response"))?;

        Ok(ChatResponse {
            content,
            model: body.model.unwrap_or_else(|| self.config.model.clone()),
            usage: body.usage,
        })
    }
}
