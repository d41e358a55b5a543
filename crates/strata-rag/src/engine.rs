//! Engine facade wiring storage, tiers, embeddings and memory together

use crate::config::EngineConfig;
use crate::document::Document;
use crate::embedding::{EmbeddingEngine, EmbeddingMode, LocalRuntime};
use crate::error::StrataResult;
use crate::history::{CompressedHistory, Exchange, HistoryCompressor};
use crate::memory::SessionMemory;
use crate::storage::{Memory, SledStorage};
use crate::tiered::{ContextDescriber, HeuristicDescriber, TierLimits, TieredContextStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Dataset holding resource tiers
pub const TIER_DATASET: &str = "tiered-context";

/// Dataset holding preferences and experiences
pub const MEMORY_DATASET: &str = "session-memory";

/// A running engine instance rooted at one storage directory
pub struct ContextEngine {
    config: EngineConfig,
    tiers: TieredContextStore,
    embeddings: EmbeddingEngine,
    memory: SessionMemory,
    compressor: HistoryCompressor,
}

impl ContextEngine {
    /// Open the engine with the default local runtime
    pub async fn open(config: EngineConfig) -> StrataResult<Self> {
        #[cfg(feature = "local-embeddings")]
        let runtime: Arc<dyn LocalRuntime> =
            Arc::new(crate::embedding::FastembedRuntime::new(config.models_dir()));
        #[cfg(not(feature = "local-embeddings"))]
        let runtime: Arc<dyn LocalRuntime> = Arc::new(crate::embedding::DisabledRuntime);

        Self::open_with_runtime(config, runtime).await
    }

    /// Open the engine with a custom local model runtime
    pub async fn open_with_runtime(
        config: EngineConfig,
        runtime: Arc<dyn LocalRuntime>,
    ) -> StrataResult<Self> {
        config.validate()?;

        let tier_storage: Arc<dyn Memory> =
            Arc::new(SledStorage::open(&config.storage_dir, TIER_DATASET));
        let memory_storage: Arc<dyn Memory> =
            Arc::new(SledStorage::open(&config.storage_dir, MEMORY_DATASET));

        let tiers = TieredContextStore::new(tier_storage)
            .with_limits(TierLimits::from(&config.tiers))
            .with_describer(describer(&config));

        let embeddings = EmbeddingEngine::new(runtime, Some(config.embeddings_dir()))
            .with_preload_settings(config.embedding.preload());
        embeddings.set_local_model(&config.embedding.local_model)?;
        if let Some((provider, api_key)) = config.embedding.remote_credentials() {
            embeddings.configure_remote_with(
                provider,
                api_key,
                config.embedding.base_url.as_deref(),
                config.embedding.model.as_deref(),
                Some(config.embedding.min_interval()),
            )?;
        }

        let memory = SessionMemory::new(memory_storage);
        let compressor = HistoryCompressor::new(config.compression);

        let tier_count = tiers.load().await;
        let memory_count = memory.load().await;
        info!(
            storage_dir = %config.storage_dir.display(),
            tiers = tier_count,
            memory_records = memory_count,
            "Context engine opened"
        );

        Ok(Self {
            config,
            tiers,
            embeddings,
            memory,
            compressor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TieredContextStore {
        &self.tiers
    }

    pub fn embeddings(&self) -> &EmbeddingEngine {
        &self.embeddings
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// Select the embedding backend, loading the local model if needed
    pub async fn initialize_embeddings(&self) -> StrataResult<EmbeddingMode> {
        self.embeddings.initialize().await
    }

    /// Generate tiers for `docs`, returning how many were new
    pub async fn index(&self, docs: &[Document]) -> usize {
        self.tiers.batch_generate(docs, None).await
    }

    pub fn compress_history(&self, exchanges: &[Exchange]) -> CompressedHistory {
        self.compressor.compress(exchanges)
    }

    /// Prompt block of session memory followed by L0 digests of `paths`.
    ///
    /// `max_memory_tokens` defaults to `memory.max_prompt_tokens` from the
    /// config. Empty sections are omitted.
    pub fn build_context<S: AsRef<str>>(
        &self,
        paths: &[S],
        max_memory_tokens: Option<usize>,
    ) -> String {
        let mut sections = Vec::new();

        let budget = max_memory_tokens.unwrap_or(self.config.memory.max_prompt_tokens);
        let memory = self.memory.build_memory_prompt(budget);
        if !memory.is_empty() {
            sections.push(memory);
        }

        let l0 = self.tiers.get_l0_batch(paths);
        if !l0.is_empty() {
            sections.push(format!("## Project Context\n{l0}"));
        }

        sections.join("\n\n")
    }

    /// Flush pending writes and close every store.
    ///
    /// Each component is shut down even if an earlier one fails; the first
    /// error is returned.
    pub async fn shutdown(&self) -> StrataResult<()> {
        let results = [
            self.tiers.close().await,
            self.embeddings.save_cache().await,
            self.memory.close().await,
        ];

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "Shutdown step failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Context engine shut down");
                Ok(())
            }
        }
    }
}

fn describer(config: &EngineConfig) -> Arc<dyn ContextDescriber> {
    llm_describer(config).unwrap_or_else(|| Arc::new(HeuristicDescriber))
}

#[cfg(feature = "llm-descriptions")]
fn llm_describer(config: &EngineConfig) -> Option<Arc<dyn ContextDescriber>> {
    let llm = config.llm.as_ref()?;
    match strata_llm::Client::new(llm.into()) {
        Ok(client) => {
            info!(model = %llm.model, "Using LLM context descriptions");
            Some(Arc::new(crate::tiered::LlmContextDescriber::new(client)))
        }
        Err(e) => {
            warn!(error = %e, "LLM client unavailable, using heuristic descriptions");
            None
        }
    }
}

#[cfg(not(feature = "llm-descriptions"))]
fn llm_describer(_config: &EngineConfig) -> Option<Arc<dyn ContextDescriber>> {
    None
}
