//! Remote embedding API client

use super::models::provider_preset;
use super::{truncate_chars, Embedder};
use crate::error::{StrataError, StrataResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Texts per remote batch request
pub const REMOTE_BATCH_SIZE: usize = 20;

const SINGLE_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BODY_EXCERPT: usize = 200;

/// Resolved remote backend settings
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Provider flag, also the cache identity
    pub provider: String,

    /// Bearer token
    pub api_key: String,

    /// Embeddings endpoint
    pub base_url: String,

    /// Model name sent in each request
    pub model: String,

    /// Expected dimensionality until the first response says otherwise
    pub dimensions: usize,

    /// Input limit in tokens; texts are cut at four characters per token
    pub max_input_tokens: usize,

    /// Minimum interval between two requests
    pub min_interval: Duration,
}

impl RemoteConfig {
    /// Fill omitted fields from the provider preset.
    ///
    /// Providers without a preset are accepted when a base URL is given and
    /// are assumed to speak the OpenAI embeddings protocol.
    pub fn resolve(
        provider: &str,
        api_key: &str,
        base_url: Option<&str>,
        model: Option<&str>,
    ) -> StrataResult<Self> {
        let preset = provider_preset(provider);

        let base_url = base_url
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .or_else(|| preset.map(|p| p.base_url.to_string()))
            .ok_or_else(|| {
                StrataError::validation("base_url", "required for unknown provider", provider)
            })?;

        let model = model
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| preset.map(|p| p.default_model.to_string()))
            .ok_or_else(|| {
                StrataError::validation("model", "required for unknown provider", provider)
            })?;

        Ok(Self {
            provider: provider.to_lowercase(),
            api_key: api_key.to_string(),
            base_url,
            model,
            dimensions: preset.map_or(0, |p| p.dimensions),
            max_input_tokens: preset.map_or(8192, |p| p.max_input_tokens),
            min_interval: Duration::from_millis(100),
        })
    }

    /// Set the minimum interval between requests
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

/// Enforces a minimum interval between consecutive remote calls.
///
/// The lock is held while sleeping, so concurrent callers are released one
/// interval apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until a call may be sent
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI-compatible embedding client
pub struct RemoteEmbedder {
    http: reqwest::Client,
    config: RemoteConfig,
    dimensions: AtomicUsize,
    limiter: RateLimiter,
}

impl RemoteEmbedder {
    pub fn new(config: RemoteConfig) -> StrataResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            dimensions: AtomicUsize::new(config.dimensions),
            limiter: RateLimiter::new(config.min_interval),
            config,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Adopt the dimensionality reported by the provider
    pub fn record_dimensions(&self, dimensions: usize) {
        let previous = self.dimensions.swap(dimensions, Ordering::Relaxed);
        if previous != dimensions {
            debug!(
                provider = %self.config.provider,
                configured = previous,
                observed = dimensions,
                "Recorded remote embedding dimensions"
            );
        }
    }

    fn max_chars(&self) -> usize {
        self.config.max_input_tokens.saturating_mul(4)
    }

    async fn request(&self, input: Value, timeout: Duration) -> StrataResult<Vec<Vec<f32>>> {
        self.limiter.acquire().await;

        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&json!({ "model": self.config.model, "input": input }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrataError::network(
                "embed",
                Some(status.as_u16()),
                body.chars().take(ERROR_BODY_EXCERPT).collect::<String>(),
            ));
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| StrataError::network("embed", Some(status.as_u16()), e.to_string()))?;

        body.data.sort_by_key(|datum| datum.index);
        Ok(body.data.into_iter().map(|datum| datum.embedding).collect())
    }

    /// Embed a list of texts in batches, preserving input order.
    ///
    /// A failed batch is retried item by item so one bad input only loses
    /// its own vector.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(REMOTE_BATCH_SIZE) {
            let input: Vec<&str> = chunk
                .iter()
                .map(|text| truncate_chars(text, self.max_chars()))
                .collect();

            match self.request(json!(input), BATCH_TIMEOUT).await {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    results.extend(vectors.into_iter().map(Some));
                }
                outcome => {
                    match outcome {
                        Ok(vectors) => warn!(
                            expected = chunk.len(),
                            received = vectors.len(),
                            "Batch embedding returned wrong count, retrying individually"
                        ),
                        Err(e) => warn!(error = %e, "Batch embedding failed, retrying individually"),
                    }
                    for text in chunk {
                        results.push(self.embed(text).await.ok());
                    }
                }
            }
        }

        results
    }
}

#[async_trait::async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> StrataResult<Vec<f32>> {
        let input = truncate_chars(text, self.max_chars());
        self.request(json!(input), SINGLE_TIMEOUT)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StrataError::embedding("remote response carried no embedding"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.load(Ordering::Relaxed)
    }

    fn identity(&self) -> String {
        self.config.provider.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn embedder_for(server: &MockServer) -> RemoteEmbedder {
        let config = RemoteConfig::resolve(
            "custom",
            "test-key",
            Some(&format!("{}/v1/embeddings", server.uri())),
            Some("embed-small"),
        )
        .unwrap()
        .with_min_interval(Duration::ZERO);
        RemoteEmbedder::new(config).unwrap()
    }

    /// Answers each input with `[position, len]`, listed in reverse index order
    struct ReversedIndexResponder;

    impl Respond for ReversedIndexResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let inputs: Vec<String> = match &body["input"] {
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().unwrap().to_string())
                    .collect(),
                Value::String(s) => vec![s.clone()],
                _ => vec![],
            };
            let data: Vec<Value> = inputs
                .iter()
                .enumerate()
                .rev()
                .map(|(i, text)| json!({"index": i, "embedding": [text.len() as f32, 1.0]}))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
        }
    }

    #[test]
    fn test_resolve_uses_presets() {
        let config = RemoteConfig::resolve("openai", "k", None, None).unwrap();
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.dimensions, 1536);

        let err = RemoteConfig::resolve("homegrown", "k", None, None).unwrap_err();
        assert!(matches!(err, StrataError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_embed_sends_bearer_and_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vector = embedder_for(&server).embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_non_success_carries_status_and_excerpt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("x".repeat(500)))
            .mount(&server)
            .await;

        match embedder_for(&server).embed("hello").await.unwrap_err() {
            StrataError::Network {
                status, message, ..
            } => {
                assert_eq!(status, Some(401));
                assert_eq!(message.len(), ERROR_BODY_EXCERPT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_batch_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ReversedIndexResponder)
            .mount(&server)
            .await;

        let texts: Vec<String> = (1..=25).map(|n| "a".repeat(n)).collect();
        let vectors = embedder_for(&server).embed_batch(&texts).await;

        assert_eq!(vectors.len(), 25);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(vector.as_ref().unwrap()[0], text.len() as f32);
        }
        // 25 texts split into batches of 20 and 5
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_single_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::body_partial_json(json!({"input": ["ok", "bad"]})))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::body_partial_json(json!({"input": "ok"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::body_partial_json(json!({"input": "bad"})))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let texts = vec!["ok".to_string(), "bad".to_string()];
        let vectors = embedder_for(&server).embed_batch(&texts).await;
        assert_eq!(vectors, vec![Some(vec![1.0]), None]);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
