//! `fastembed` runtime fed with ONNX exports downloaded from Hugging Face

use super::l2_normalize;
use super::local::{
    ExecutionBackend, LoadProgress, LocalPipeline, LocalRuntime, ProgressObserver, RuntimeError,
};
use super::models::LocalModelSpec;
use anyhow::Context;
use fastembed::{
    InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const HUB_URL: &str = "https://huggingface.co";

const TOKENIZER_FILES: [&str; 4] = [
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

fn graph_file(backend: ExecutionBackend) -> &'static str {
    match backend {
        ExecutionBackend::Native => "onnx/model.onnx",
        ExecutionBackend::Portable => "onnx/model_quantized.onnx",
    }
}

/// Downloads model artifacts into `<models_dir>/<short-name>/` and builds a
/// mean-pooled [`TextEmbedding`]
pub struct FastembedRuntime {
    http: reqwest::Client,
    models_dir: PathBuf,
    hub_url: String,
}

impl FastembedRuntime {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            models_dir: models_dir.into(),
            hub_url: HUB_URL.to_string(),
        }
    }

    /// Use a different model hub, e.g. a mirror
    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into().trim_end_matches('/').to_string();
        self
    }

    fn artifacts(backend: ExecutionBackend) -> impl Iterator<Item = &'static str> {
        TOKENIZER_FILES.into_iter().chain(std::iter::once(graph_file(backend)))
    }

    async fn fetch(
        &self,
        spec: &LocalModelSpec,
        file: &str,
        observer: Option<&ProgressObserver>,
        cancel: &AtomicBool,
    ) -> Result<(), RuntimeError> {
        let dest = self.cache_dir(spec).join(file);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(());
        }
        let notify = |progress: LoadProgress| {
            if let Some(observer) = observer {
                observer(progress);
            }
        };

        notify(LoadProgress::Initiate {
            file: file.to_string(),
        });

        let url = format!("{}/{}/resolve/main/{}", self.hub_url, spec.repository, file);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to fetch {url}"))?;

        notify(LoadProgress::Download {
            file: file.to_string(),
        });

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create model directory")?;
        }
        let partial = dest.with_extension("part");
        let mut out = tokio::fs::File::create(&partial)
            .await
            .context("failed to create model file")?;

        let total = response.content_length();
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::Acquire) {
                drop(out);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(RuntimeError::Cancelled);
            }
            let chunk = chunk.context("download interrupted")?;
            out.write_all(&chunk).await.context("failed to write model file")?;
            received += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                notify(LoadProgress::Progress {
                    file: file.to_string(),
                    percent: (received as f32 / total as f32) * 100.0,
                });
            }
        }

        out.flush().await.context("failed to flush model file")?;
        drop(out);
        tokio::fs::rename(&partial, &dest)
            .await
            .context("failed to finalize model file")?;

        debug!(model = spec.id, file = file, bytes = received, "Downloaded model artifact");
        notify(LoadProgress::Done {
            file: file.to_string(),
        });
        Ok(())
    }
}

fn read(dir: &Path, file: &str) -> anyhow::Result<Vec<u8>> {
    std::fs::read(dir.join(file)).with_context(|| format!("failed to read {file}"))
}

fn build_model(
    dir: &Path,
    backend: ExecutionBackend,
    max_length: usize,
) -> anyhow::Result<TextEmbedding> {
    let tokenizer_files = TokenizerFiles {
        tokenizer_file: read(dir, "tokenizer.json")?,
        config_file: read(dir, "config.json")?,
        special_tokens_map_file: read(dir, "special_tokens_map.json")?,
        tokenizer_config_file: read(dir, "tokenizer_config.json")?,
    };
    let model = UserDefinedEmbeddingModel::new(read(dir, graph_file(backend))?, tokenizer_files)
        .with_pooling(Pooling::Mean);

    TextEmbedding::try_new_from_user_defined(
        model,
        InitOptionsUserDefined::new().with_max_length(max_length),
    )
}

#[async_trait::async_trait]
impl LocalRuntime for FastembedRuntime {
    fn is_cached(&self, spec: &LocalModelSpec) -> bool {
        let dir = self.cache_dir(spec);
        TOKENIZER_FILES.iter().all(|file| dir.join(file).is_file())
            && (dir.join(graph_file(ExecutionBackend::Native)).is_file()
                || dir.join(graph_file(ExecutionBackend::Portable)).is_file())
    }

    fn cache_dir(&self, spec: &LocalModelSpec) -> PathBuf {
        self.models_dir.join(spec.short_name)
    }

    async fn load(
        &self,
        spec: &LocalModelSpec,
        backend: ExecutionBackend,
        observer: Option<ProgressObserver>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Arc<dyn LocalPipeline>, RuntimeError> {
        for file in Self::artifacts(backend) {
            self.fetch(spec, file, observer.as_ref(), &cancel).await?;
        }

        let dir = self.cache_dir(spec);
        let max_length = spec.max_tokens;
        let model = tokio::task::spawn_blocking(move || build_model(&dir, backend, max_length))
            .await
            .context("model loader panicked")??;

        info!(model = spec.id, backend = ?backend, "Built local embedding pipeline");
        Ok(Arc::new(FastembedPipeline { model }))
    }
}

struct FastembedPipeline {
    model: TextEmbedding,
}

impl LocalPipeline for FastembedPipeline {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = self
            .model
            .embed(vec![text], None)?
            .into_iter()
            .next()
            .context("model returned no embedding")?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}
