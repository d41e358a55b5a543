//! Local model pipeline with bounded load recovery

use super::models::LocalModelSpec;
use super::{truncate_chars, Embedder};
use crate::error::{StrataError, StrataResult};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Inference backend used to run the ONNX graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionBackend {
    /// Full precision graph on the native runtime
    Native,
    /// Quantized graph, used after a native loader failure.
    ///
    /// Runs on the same ONNX runtime as [`Native`](Self::Native); only the
    /// graph changes. A runtime that cannot be loaded at all (missing or
    /// incompatible `libonnxruntime`) fails the same way here.
    Portable,
}

/// Download progress stages
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProgress {
    Initiate { file: String },
    Download { file: String },
    Progress { file: String, percent: f32 },
    Done { file: String },
}

/// Callback receiving download progress
pub type ProgressObserver = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// Result of a load attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A pipeline is resident
    Loaded,
    /// The download was cancelled; nothing is resident
    Cancelled,
    /// Another load is already running
    InProgress,
}

/// Failure reported by a [`LocalRuntime`]
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("download cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// A loaded model that turns text into a vector
pub trait LocalPipeline: Send + Sync {
    /// Run inference. Called from a blocking thread.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Resolves model artifacts and builds pipelines
#[async_trait::async_trait]
pub trait LocalRuntime: Send + Sync {
    /// Whether every artifact for `spec` is already on disk
    fn is_cached(&self, spec: &LocalModelSpec) -> bool;

    /// Directory holding the artifacts for `spec`
    fn cache_dir(&self, spec: &LocalModelSpec) -> PathBuf;

    /// Fetch artifacts as needed and build a pipeline. `cancel` is checked
    /// while downloading; `observer` is `None` when no progress should be
    /// reported.
    async fn load(
        &self,
        spec: &LocalModelSpec,
        backend: ExecutionBackend,
        observer: Option<ProgressObserver>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Arc<dyn LocalPipeline>, RuntimeError>;
}

/// Runtime for builds without local inference; every load fails
#[derive(Debug, Default)]
pub struct DisabledRuntime;

#[async_trait::async_trait]
impl LocalRuntime for DisabledRuntime {
    fn is_cached(&self, _spec: &LocalModelSpec) -> bool {
        true
    }

    fn cache_dir(&self, spec: &LocalModelSpec) -> PathBuf {
        PathBuf::from(spec.short_name)
    }

    async fn load(
        &self,
        _spec: &LocalModelSpec,
        _backend: ExecutionBackend,
        _observer: Option<ProgressObserver>,
        _cancel: Arc<AtomicBool>,
    ) -> Result<Arc<dyn LocalPipeline>, RuntimeError> {
        Err(anyhow::anyhow!("local embeddings are not enabled in this build").into())
    }
}

const NATIVE_LOADER_PATTERNS: &[&str] = &[
    "dlopen",
    "cannot open shared object",
    "libonnxruntime",
    "loadlibrary",
    ".dll",
    "symbol not found",
    "undefined symbol",
    "execution provider",
];

const CORRUPTION_PATTERNS: &[&str] = &[
    "protobuf parsing failed",
    "invalid protobuf",
    "invalid model",
    "unexpected end of file",
    "failed to parse",
    "eof while parsing",
    "expected value at line",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Cancelled,
    NativeLoader,
    CorruptArtifact,
    Other,
}

fn classify(err: &RuntimeError) -> FailureKind {
    let RuntimeError::Failed(err) = err else {
        return FailureKind::Cancelled;
    };
    let message = format!("{err:#}").to_lowercase();

    if NATIVE_LOADER_PATTERNS.iter().any(|p| message.contains(p)) {
        FailureKind::NativeLoader
    } else if CORRUPTION_PATTERNS.iter().any(|p| message.contains(p)) {
        FailureKind::CorruptArtifact
    } else {
        FailureKind::Other
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RetryStep {
    SwitchToPortable,
    RepairCache,
    Abort,
    Fail,
}

/// Each recovery runs at most once, so a load makes at most three attempts.
#[derive(Debug)]
struct RetryPolicy {
    backend: ExecutionBackend,
    portable_tried: bool,
    repair_tried: bool,
}

impl RetryPolicy {
    fn new() -> Self {
        Self {
            backend: ExecutionBackend::Native,
            portable_tried: false,
            repair_tried: false,
        }
    }

    fn next(&mut self, err: &RuntimeError) -> RetryStep {
        match classify(err) {
            FailureKind::Cancelled => RetryStep::Abort,
            FailureKind::NativeLoader if !self.portable_tried => {
                self.portable_tried = true;
                self.backend = ExecutionBackend::Portable;
                RetryStep::SwitchToPortable
            }
            FailureKind::CorruptArtifact if !self.repair_tried => {
                self.repair_tried = true;
                RetryStep::RepairCache
            }
            _ => RetryStep::Fail,
        }
    }
}

/// Embedder backed by a model from the local catalog
pub struct LocalEmbedder {
    runtime: Arc<dyn LocalRuntime>,
    spec: RwLock<&'static LocalModelSpec>,
    pipeline: RwLock<Option<Arc<dyn LocalPipeline>>>,
    loading: AtomicBool,
    cancel: Arc<AtomicBool>,
    observer: RwLock<Option<ProgressObserver>>,
}

impl LocalEmbedder {
    pub fn new(runtime: Arc<dyn LocalRuntime>, spec: &'static LocalModelSpec) -> Self {
        Self {
            runtime,
            spec: RwLock::new(spec),
            pipeline: RwLock::new(None),
            loading: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            observer: RwLock::new(None),
        }
    }

    /// Receive download progress events
    pub fn with_observer(self, observer: ProgressObserver) -> Self {
        self.set_observer(observer);
        self
    }

    /// Replace the progress observer
    pub fn set_observer(&self, observer: ProgressObserver) {
        *self.observer.write() = Some(observer);
    }

    /// Currently selected model
    pub fn spec(&self) -> &'static LocalModelSpec {
        *self.spec.read()
    }

    /// Select a different model. Drops any resident pipeline.
    pub fn set_model(&self, spec: &'static LocalModelSpec) {
        *self.spec.write() = spec;
        self.unload();
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.read().is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Request cancellation of an in-flight download
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Drop the resident pipeline
    pub fn unload(&self) {
        self.pipeline.write().take();
    }

    /// Load the selected model, recovering from native loader failures and
    /// corrupted cached artifacts once each.
    pub async fn load(&self) -> StrataResult<LoadOutcome> {
        if self.is_loaded() {
            return Ok(LoadOutcome::Loaded);
        }
        if self.loading.swap(true, Ordering::AcqRel) {
            return Ok(LoadOutcome::InProgress);
        }
        self.cancel.store(false, Ordering::Release);

        let result = self.load_with_policy().await;
        self.loading.store(false, Ordering::Release);
        result
    }

    async fn load_with_policy(&self) -> StrataResult<LoadOutcome> {
        let spec = self.spec();
        let mut policy = RetryPolicy::new();

        loop {
            let observer = if self.runtime.is_cached(spec) {
                None
            } else {
                self.observer.read().clone()
            };

            let err = match self
                .runtime
                .load(spec, policy.backend, observer, self.cancel.clone())
                .await
            {
                Ok(pipeline) => {
                    *self.pipeline.write() = Some(pipeline);
                    info!(model = spec.id, backend = ?policy.backend, "Local model loaded");
                    return Ok(LoadOutcome::Loaded);
                }
                Err(err) => err,
            };

            match policy.next(&err) {
                RetryStep::Abort => {
                    info!(model = spec.id, "Model download cancelled");
                    return Ok(LoadOutcome::Cancelled);
                }
                RetryStep::SwitchToPortable => {
                    warn!(model = spec.id, error = %err, "Native backend failed, retrying with portable backend");
                }
                RetryStep::RepairCache => {
                    let dir = self.runtime.cache_dir(spec);
                    warn!(model = spec.id, dir = %dir.display(), error = %err, "Cached model looks corrupted, deleting and retrying");
                    match tokio::fs::remove_dir_all(&dir).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(StrataError::model_load(spec.id, e.to_string())),
                    }
                }
                RetryStep::Fail => return Err(StrataError::model_load(spec.id, err.to_string())),
            }
        }
    }
}

#[async_trait::async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> StrataResult<Vec<f32>> {
        let pipeline = self
            .pipeline
            .read()
            .clone()
            .ok_or_else(|| StrataError::embedding("local model not loaded"))?;

        let input = truncate_chars(text, self.spec().max_tokens.saturating_mul(4)).to_string();
        tokio::task::spawn_blocking(move || pipeline.embed(&input))
            .await
            .map_err(|e| StrataError::embedding(e.to_string()))?
            .map_err(|e| StrataError::embedding(format!("{e:#}")))
    }

    fn dimensions(&self) -> usize {
        self.spec().dimensions
    }

    fn identity(&self) -> String {
        self.spec().short_name.to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// Pipeline returning fixed vectors per text, or a hash-derived one
    pub(crate) struct FakePipeline {
        pub(crate) dims: usize,
        pub(crate) vectors: HashMap<String, Vec<f32>>,
    }

    impl LocalPipeline for FakePipeline {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if let Some(v) = self.vectors.get(text) {
                return Ok(v.clone());
            }
            let mut v = vec![0.0; self.dims];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dims] += b as f32;
            }
            Ok(v)
        }
    }

    /// Runtime that replays scripted failures before succeeding
    #[derive(Default)]
    pub(crate) struct FakeRuntime {
        pub(crate) cached: AtomicBool,
        pub(crate) failures: Mutex<VecDeque<RuntimeError>>,
        pub(crate) backends: Mutex<Vec<ExecutionBackend>>,
        pub(crate) vectors: HashMap<String, Vec<f32>>,
        pub(crate) cache_root: PathBuf,
    }

    impl FakeRuntime {
        pub(crate) fn failing_with(failures: Vec<RuntimeError>) -> Self {
            Self {
                failures: Mutex::new(failures.into()),
                ..Default::default()
            }
        }

        pub(crate) fn with_vectors(vectors: HashMap<String, Vec<f32>>) -> Self {
            Self {
                cached: AtomicBool::new(true),
                vectors,
                ..Default::default()
            }
        }

        pub(crate) fn attempts(&self) -> Vec<ExecutionBackend> {
            self.backends.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl LocalRuntime for FakeRuntime {
        fn is_cached(&self, _spec: &LocalModelSpec) -> bool {
            self.cached.load(Ordering::Acquire)
        }

        fn cache_dir(&self, spec: &LocalModelSpec) -> PathBuf {
            self.cache_root.join(spec.short_name)
        }

        async fn load(
            &self,
            spec: &LocalModelSpec,
            backend: ExecutionBackend,
            observer: Option<ProgressObserver>,
            cancel: Arc<AtomicBool>,
        ) -> Result<Arc<dyn LocalPipeline>, RuntimeError> {
            self.backends.lock().push(backend);
            if let Some(observer) = &observer {
                let file = "onnx/model.onnx".to_string();
                observer(LoadProgress::Initiate { file: file.clone() });
                observer(LoadProgress::Download { file: file.clone() });
                if cancel.load(Ordering::Acquire) {
                    return Err(RuntimeError::Cancelled);
                }
                observer(LoadProgress::Progress {
                    file: file.clone(),
                    percent: 100.0,
                });
                observer(LoadProgress::Done { file });
            }
            if let Some(err) = self.failures.lock().pop_front() {
                return Err(err);
            }
            Ok(Arc::new(FakePipeline {
                dims: spec.dimensions,
                vectors: self.vectors.clone(),
            }))
        }
    }
}
