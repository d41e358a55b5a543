//! Embedding engine composing remote and local backends

use super::cache::EmbeddingCache;
use super::local::{LoadOutcome, LocalEmbedder, LocalRuntime, ProgressObserver};
use super::models::{default_local_model, local_model};
use super::remote::{RemoteConfig, RemoteEmbedder, REMOTE_BATCH_SIZE};
use super::{cosine_similarity, Embedder};
use crate::document::Document;
use crate::error::{StrataError, StrataResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which backend serves embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    Remote,
    Local,
}

/// Tuning for [`EmbeddingEngine::preload_embeddings`]
#[derive(Debug, Clone)]
pub struct PreloadSettings {
    /// Concurrent workers pulling from the queue
    pub workers: usize,

    /// Pause between one worker's consecutive remote calls
    pub remote_delay: Duration,

    /// Persist the cache after this many new vectors
    pub save_every: usize,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            remote_delay: Duration::from_millis(100),
            save_every: 50,
        }
    }
}

/// Progress of a preload run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadProgress {
    pub completed: usize,
    pub total: usize,
}

/// Summary of a preload run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    /// Documents already cached with a matching hash
    pub cached: usize,
    /// Vectors computed during this run
    pub computed: usize,
    /// Documents left without a vector
    pub failed: usize,
}

#[derive(Default)]
struct PreloadCounters {
    completed: AtomicUsize,
    computed: AtomicUsize,
    failed: AtomicUsize,
    unsaved: AtomicUsize,
}

/// A ranked search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub score: f32,
}

/// Snapshot of the engine state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingStats {
    pub mode: EmbeddingMode,
    pub identity: String,
    pub dimensions: usize,
    pub cached_entries: usize,
    pub local_loaded: bool,
}

/// Dual-mode embedding engine.
///
/// Remote mode is adopted by [`initialize`](Self::initialize) when a probe
/// call succeeds; local mode otherwise. In remote mode a failed call falls
/// back to the local pipeline if one is resident.
pub struct EmbeddingEngine {
    remote: RwLock<Option<Arc<RemoteEmbedder>>>,
    remote_active: AtomicBool,
    local: Arc<LocalEmbedder>,
    cache: EmbeddingCache,
    preload: PreloadSettings,
}

impl EmbeddingEngine {
    /// Create an engine using `runtime` for local models and persisting
    /// vectors under `cache_dir`
    pub fn new(runtime: Arc<dyn LocalRuntime>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            remote: RwLock::new(None),
            remote_active: AtomicBool::new(false),
            local: Arc::new(LocalEmbedder::new(runtime, default_local_model())),
            cache: EmbeddingCache::new(cache_dir),
            preload: PreloadSettings::default(),
        }
    }

    /// Engine with the Hugging Face / fastembed runtime rooted at `models_dir`
    #[cfg(feature = "local-embeddings")]
    pub fn with_fastembed(models_dir: impl Into<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        Self::new(
            Arc::new(super::FastembedRuntime::new(models_dir)),
            cache_dir,
        )
    }

    pub fn with_preload_settings(mut self, settings: PreloadSettings) -> Self {
        self.preload = settings;
        self
    }

    /// Receive local model download progress
    pub fn set_progress_observer(&self, observer: ProgressObserver) {
        self.local.set_observer(observer);
    }

    /// Configure the remote backend. Returns `false` and leaves the engine
    /// local-only when either the provider or the key is empty.
    pub fn configure_remote(
        &self,
        provider: &str,
        api_key: &str,
        base_url: Option<&str>,
        model: Option<&str>,
    ) -> StrataResult<bool> {
        self.configure_remote_with(provider, api_key, base_url, model, None)
    }

    /// Like [`configure_remote`](Self::configure_remote), overriding the
    /// minimum interval between requests
    pub fn configure_remote_with(
        &self,
        provider: &str,
        api_key: &str,
        base_url: Option<&str>,
        model: Option<&str>,
        min_interval: Option<Duration>,
    ) -> StrataResult<bool> {
        if provider.trim().is_empty() || api_key.trim().is_empty() {
            *self.remote.write() = None;
            self.remote_active.store(false, Ordering::Release);
            return Ok(false);
        }

        let mut config = RemoteConfig::resolve(provider, api_key, base_url, model)?;
        if let Some(interval) = min_interval {
            config = config.with_min_interval(interval);
        }
        info!(provider = %config.provider, model = %config.model, "Remote embeddings configured");
        *self.remote.write() = Some(Arc::new(RemoteEmbedder::new(config)?));
        Ok(true)
    }

    /// Select the local model. Must be called before the model is loaded.
    pub fn set_local_model(&self, model_id: &str) -> StrataResult<()> {
        let spec = local_model(model_id)
            .ok_or_else(|| StrataError::validation("model_id", "unknown local model", model_id))?;
        if self.local.is_loaded() || self.local.is_loading() {
            return Err(StrataError::validation(
                "model_id",
                "model already loaded, use switch_local_model",
                model_id,
            ));
        }
        self.local.set_model(spec);
        Ok(())
    }

    /// Probe the remote backend and fall back to the local model.
    ///
    /// Only a local load that fails after every recovery is an error.
    pub async fn initialize(&self) -> StrataResult<EmbeddingMode> {
        let remote = self.remote.read().clone();
        if let Some(remote) = remote {
            match remote.embed("test").await {
                Ok(vector) => {
                    remote.record_dimensions(vector.len());
                    self.remote_active.store(true, Ordering::Release);
                    let loaded = self.cache.load(&remote.identity(), vector.len()).await;
                    info!(
                        provider = %remote.identity(),
                        dimensions = vector.len(),
                        cached = loaded,
                        "Using remote embeddings"
                    );
                    return Ok(EmbeddingMode::Remote);
                }
                Err(e) => {
                    warn!(provider = %remote.identity(), error = %e, "Remote embedding probe failed, falling back to local model");
                }
            }
        }

        self.remote_active.store(false, Ordering::Release);
        self.load_local_model().await?;
        Ok(EmbeddingMode::Local)
    }

    /// Load the selected local model and, in local mode, its vector cache
    pub async fn load_local_model(&self) -> StrataResult<LoadOutcome> {
        let outcome = self.local.load().await?;
        if outcome == LoadOutcome::Loaded && !self.is_remote() {
            let loaded = self
                .cache
                .load(&self.local.identity(), self.local.dimensions())
                .await;
            debug!(model = %self.local.identity(), cached = loaded, "Local embedding cache ready");
        }
        Ok(outcome)
    }

    /// Abort an in-flight model download
    pub fn cancel_download(&self) {
        self.local.cancel();
    }

    /// Replace the local model, dropping vectors of the previous one
    pub async fn switch_local_model(&self, model_id: &str) -> StrataResult<LoadOutcome> {
        let spec = local_model(model_id)
            .ok_or_else(|| StrataError::validation("model_id", "unknown local model", model_id))?;

        info!(from = %self.local.identity(), to = spec.short_name, "Switching local model");
        self.local.set_model(spec);
        if !self.is_remote() {
            self.cache.clear();
        }
        self.load_local_model().await
    }

    pub fn is_remote(&self) -> bool {
        self.remote_active.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> EmbeddingMode {
        if self.is_remote() {
            EmbeddingMode::Remote
        } else {
            EmbeddingMode::Local
        }
    }

    fn active_remote(&self) -> Option<Arc<RemoteEmbedder>> {
        if self.is_remote() {
            self.remote.read().clone()
        } else {
            None
        }
    }

    /// Backends to try, in order
    fn chain(&self) -> Vec<Arc<dyn Embedder>> {
        let mut chain: Vec<Arc<dyn Embedder>> = Vec::with_capacity(2);
        if let Some(remote) = self.active_remote() {
            chain.push(remote);
        }
        if self.local.is_loaded() {
            chain.push(self.local.clone());
        }
        chain
    }

    /// Identity of the active backend
    pub fn identity(&self) -> String {
        match self.active_remote() {
            Some(remote) => remote.identity(),
            None => self.local.identity(),
        }
    }

    /// Dimensionality of the active backend
    pub fn dimensions(&self) -> usize {
        match self.active_remote() {
            Some(remote) => remote.dimensions(),
            None => self.local.dimensions(),
        }
    }

    /// Embed a text with the first backend that succeeds
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        for embedder in self.chain() {
            match embedder.embed(text).await {
                Ok(vector) => return Some(vector),
                Err(e) => warn!(backend = %embedder.identity(), error = %e, "Embedding failed"),
            }
        }
        None
    }

    /// Embed many texts remotely, preserving order. All `None` when remote
    /// mode is not active.
    pub async fn embed_batch_remote(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        match self.active_remote() {
            Some(remote) => remote.embed_batch(texts).await,
            None => vec![None; texts.len()],
        }
    }

    /// Cached vector for the document, computing and caching it on a miss
    pub async fn get_doc_embedding(&self, path: &str, content: &str, hash: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.cache.get(path, hash) {
            return Some(vector);
        }
        let vector = self.embed(content).await?;
        self.cache.insert(path, hash, vector.clone());
        Some(vector)
    }

    /// Rank `docs` by cosine similarity to `query`, best first
    pub async fn semantic_search(&self, query: &str, docs: &[Document], top_k: usize) -> Vec<SearchHit> {
        let Some(query_vector) = self.embed(query).await else {
            return Vec::new();
        };

        let mut hits = Vec::with_capacity(docs.len());
        for doc in docs {
            if let Some(vector) = self.get_doc_embedding(&doc.path, &doc.content, &doc.hash).await {
                hits.push(SearchHit {
                    path: doc.path.clone(),
                    score: cosine_similarity(&query_vector, &vector),
                });
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        hits
    }

    /// Compute vectors for every uncached document with a bounded worker
    /// pool, persisting the cache periodically and at the end.
    pub async fn preload_embeddings(
        &self,
        docs: &[Document],
        on_progress: Option<&(dyn Fn(PreloadProgress) + Send + Sync)>,
    ) -> PreloadReport {
        let (cached, needing): (Vec<&Document>, Vec<&Document>) = docs
            .iter()
            .partition(|doc| self.cache.get(&doc.path, &doc.hash).is_some());

        let mut report = PreloadReport {
            cached: cached.len(),
            ..Default::default()
        };
        if needing.is_empty() {
            return report;
        }

        let remote = self.is_remote();
        let unit_size = if remote { REMOTE_BATCH_SIZE } else { 1 };
        let queue: Mutex<VecDeque<Vec<&Document>>> =
            Mutex::new(needing.chunks(unit_size).map(<[_]>::to_vec).collect());

        let total = docs.len();
        let counters = PreloadCounters {
            completed: AtomicUsize::new(cached.len()),
            ..Default::default()
        };
        let identity = self.identity();

        info!(
            total = total,
            cached = cached.len(),
            pending = needing.len(),
            mode = ?self.mode(),
            "Preloading embeddings"
        );

        let (queue, counters, identity_ref) = (&queue, &counters, identity.as_str());
        let worker = move |worker_id: usize| async move {
            let mut first_call = true;
            loop {
                let Some(unit) = queue.lock().pop_front() else {
                    break;
                };

                let vectors = if remote {
                    if !first_call {
                        tokio::time::sleep(self.preload.remote_delay).await;
                    }
                    first_call = false;
                    let texts: Vec<String> = unit.iter().map(|d| d.content.clone()).collect();
                    self.embed_batch_remote(&texts).await
                } else {
                    let mut vectors = Vec::with_capacity(unit.len());
                    for doc in &unit {
                        vectors.push(self.embed(&doc.content).await);
                    }
                    vectors
                };

                for (doc, vector) in unit.iter().zip(vectors) {
                    match vector {
                        Some(vector) => {
                            self.cache.insert(doc.path.as_str(), doc.hash.as_str(), vector);
                            counters.computed.fetch_add(1, Ordering::Relaxed);
                            counters.unsaved.fetch_add(1, Ordering::AcqRel);
                        }
                        None => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    let done = counters.completed.fetch_add(1, Ordering::AcqRel) + 1;
                    if let Some(on_progress) = on_progress {
                        on_progress(PreloadProgress {
                            completed: done,
                            total,
                        });
                    }
                }

                if counters.unsaved.load(Ordering::Acquire) >= self.preload.save_every {
                    counters.unsaved.store(0, Ordering::Release);
                    if let Err(e) = self.cache.save(identity_ref).await {
                        warn!(worker = worker_id, error = %e, "Failed to persist embedding cache");
                    }
                }
            }
        };

        futures::future::join_all((0..self.preload.workers.max(1)).map(worker)).await;

        if let Err(e) = self.cache.save(&identity).await {
            warn!(error = %e, "Failed to persist embedding cache");
        }

        report.computed = counters.computed.load(Ordering::Acquire);
        report.failed = counters.failed.load(Ordering::Acquire);
        info!(
            computed = report.computed,
            failed = report.failed,
            "Embedding preload finished"
        );
        report
    }

    /// Persist the vector cache of the active backend
    pub async fn save_cache(&self) -> StrataResult<()> {
        self.cache.save(&self.identity()).await
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            mode: self.mode(),
            identity: self.identity(),
            dimensions: self.dimensions(),
            cached_entries: self.cache.len(),
            local_loaded: self.local.is_loaded(),
        }
    }
}
