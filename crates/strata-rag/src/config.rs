//! Engine configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `STRATA__*` environment variables (`__` separates nesting levels, e.g.
//! `STRATA__EMBEDDING__PROVIDER=openai`). A `.env` file is read first.

use crate::embedding::models::{local_model, DEFAULT_LOCAL_MODEL};
use crate::embedding::PreloadSettings;
use crate::error::{StrataError, StrataResult};
use crate::history::CompressionOptions;
use crate::tiered::TierLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "STRATA";

/// History compression thresholds as configured
pub type CompressionSettings = CompressionOptions;

/// Top-level configuration of a [`ContextEngine`](crate::engine::ContextEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for stores, vector caches and model files
    pub storage_dir: PathBuf,

    pub embedding: EmbeddingSettings,

    pub tiers: TierSettings,

    pub memory: MemorySettings,

    pub compression: CompressionSettings,

    /// Chat-completion endpoint for L1 descriptions. Heuristic digests are
    /// used when absent.
    pub llm: Option<LlmSettings>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".strata"),
            embedding: EmbeddingSettings::default(),
            tiers: TierSettings::default(),
            memory: MemorySettings::default(),
            compression: CompressionSettings::default(),
            llm: None,
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Remote provider preset name or label for a custom endpoint
    pub provider: Option<String>,

    pub api_key: Option<String>,

    /// Overrides the preset endpoint
    pub base_url: Option<String>,

    /// Overrides the preset model
    pub model: Option<String>,

    /// Local model id or short name
    pub local_model: String,

    /// Minimum spacing of remote requests in milliseconds
    pub min_interval_ms: u64,

    pub preload_workers: usize,

    /// Pause between one worker's remote calls in milliseconds
    pub preload_delay_ms: u64,

    /// Persist the vector cache after this many new vectors
    pub save_every: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        let preload = PreloadSettings::default();
        Self {
            provider: None,
            api_key: None,
            base_url: None,
            model: None,
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            min_interval_ms: 100,
            preload_workers: preload.workers,
            preload_delay_ms: preload.remote_delay.as_millis() as u64,
            save_every: preload.save_every,
        }
    }
}

impl EmbeddingSettings {
    /// Provider and key, when both are set and non-empty
    pub fn remote_credentials(&self) -> Option<(&str, &str)> {
        let provider = self.provider.as_deref().filter(|p| !p.trim().is_empty())?;
        let api_key = self.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        Some((provider, api_key))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn preload(&self) -> PreloadSettings {
        PreloadSettings {
            workers: self.preload_workers,
            remote_delay: Duration::from_millis(self.preload_delay_ms),
            save_every: self.save_every,
        }
    }
}

/// Digest rendering limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub l0_classes: usize,
    pub l0_functions: usize,
    pub l0_exports: usize,
    pub l1_imports: usize,
    pub l1_excerpt_lines: usize,
    pub flush_every: usize,
}

impl Default for TierSettings {
    fn default() -> Self {
        let limits = TierLimits::default();
        Self {
            l0_classes: limits.l0_classes,
            l0_functions: limits.l0_functions,
            l0_exports: limits.l0_exports,
            l1_imports: limits.l1_imports,
            l1_excerpt_lines: limits.l1_excerpt_lines,
            flush_every: limits.flush_every,
        }
    }
}

impl From<&TierSettings> for TierLimits {
    fn from(settings: &TierSettings) -> Self {
        Self {
            l0_classes: settings.l0_classes,
            l0_functions: settings.l0_functions,
            l0_exports: settings.l0_exports,
            l1_imports: settings.l1_imports,
            l1_excerpt_lines: settings.l1_excerpt_lines,
            flush_every: settings.flush_every,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Token budget of the memory block in [`build_context`](crate::engine::ContextEngine::build_context)
    pub max_prompt_tokens: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_prompt_tokens: 500,
        }
    }
}

/// OpenAI-compatible chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            temperature: 0.3,
            timeout_secs: 30,
        }
    }
}

#[cfg(feature = "llm-descriptions")]
impl From<&LlmSettings> for strata_llm::ClientConfig {
    fn from(settings: &LlmSettings) -> Self {
        strata_llm::ClientConfig::new(&settings.base_url, &settings.api_key, &settings.model)
            .with_max_tokens(settings.max_tokens)
            .with_temperature(settings.temperature)
            .with_timeout(Duration::from_secs(settings.timeout_secs))
    }
}

impl EngineConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> StrataResult<Self> {
        dotenv::dotenv().ok();

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> StrataResult<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(StrataError::validation("storage_dir", "must not be empty", ""));
        }
        if local_model(&self.embedding.local_model).is_none() {
            return Err(StrataError::validation(
                "embedding.local_model",
                "unknown local model",
                &self.embedding.local_model,
            ));
        }
        if self.embedding.preload_workers == 0 {
            return Err(StrataError::validation(
                "embedding.preload_workers",
                "must be at least 1",
                "0",
            ));
        }
        if self.embedding.save_every == 0 {
            return Err(StrataError::validation("embedding.save_every", "must be at least 1", "0"));
        }
        if self.tiers.flush_every == 0 {
            return Err(StrataError::validation("tiers.flush_every", "must be at least 1", "0"));
        }
        if self.compression.keep_recent_count > self.compression.max_history_length {
            return Err(StrataError::validation(
                "compression.keep_recent_count",
                "must not exceed max_history_length",
                self.compression.keep_recent_count.to_string(),
            ));
        }
        if let Some(llm) = &self.llm {
            if llm.api_key.trim().is_empty() {
                return Err(StrataError::validation("llm.api_key", "must not be empty", ""));
            }
        }
        Ok(())
    }

    /// Render as TOML, suitable for [`load`](Self::load)
    pub fn to_toml(&self) -> StrataResult<String> {
        toml::to_string_pretty(self).map_err(|e| StrataError::config(e.to_string()))
    }

    pub fn with_storage_dir(mut self, storage_dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = storage_dir.into();
        self
    }

    /// Use a remote embedding provider
    pub fn with_remote(mut self, provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.embedding.provider = Some(provider.into());
        self.embedding.api_key = Some(api_key.into());
        self
    }

    pub fn with_local_model(mut self, model: impl Into<String>) -> Self {
        self.embedding.local_model = model.into();
        self
    }

    pub fn with_compression(mut self, compression: CompressionSettings) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_llm(mut self, llm: LlmSettings) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Directory of the vector cache files
    pub fn embeddings_dir(&self) -> PathBuf {
        self.storage_dir.join("embeddings")
    }

    /// Directory of downloaded local models
    pub fn models_dir(&self) -> PathBuf {
        self.storage_dir.join("models")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.compression.keep_recent_count, 3);
        assert_eq!(config.compression.max_history_length, 8);
        assert_eq!(config.embedding.preload_workers, 3);
        assert_eq!(config.tiers.flush_every, 50);
        assert!(config.embedding.remote_credentials().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::default()
            .with_local_model("no-such-model")
            .validate()
            .is_err());

        let compression = CompressionSettings {
            keep_recent_count: 9,
            max_history_length: 8,
        };
        assert!(EngineConfig::default()
            .with_compression(compression)
            .validate()
            .is_err());

        assert!(EngineConfig::default()
            .with_llm(LlmSettings::default())
            .validate()
            .is_err());
    }

    #[test]
    fn test_blank_credentials_are_ignored() {
        let config = EngineConfig::default().with_remote("openai", "  ");
        assert!(config.embedding.remote_credentials().is_none());

        let config = EngineConfig::default().with_remote("openai", "sk-test");
        assert_eq!(config.embedding.remote_credentials(), Some(("openai", "sk-test")));
    }

    #[test]
    fn test_load_layers_file_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            r#"
storage_dir = "/tmp/strata-test"

[embedding]
provider = "voyage"
local_model = "bge-small-en-v1.5"

[tiers]
flush_every = 10
"#,
        )
        .unwrap();

        std::env::set_var("STRATA__MEMORY__MAX_PROMPT_TOKENS", "1234");
        let config = EngineConfig::load(Some(&path)).unwrap();
        std::env::remove_var("STRATA__MEMORY__MAX_PROMPT_TOKENS");

        assert_eq!(config.storage_dir, PathBuf::from("/tmp/strata-test"));
        assert_eq!(config.embedding.provider.as_deref(), Some("voyage"));
        assert_eq!(config.embedding.local_model, "bge-small-en-v1.5");
        assert_eq!(config.tiers.flush_every, 10);
        assert_eq!(config.tiers.l1_imports, 15);
        assert_eq!(config.memory.max_prompt_tokens, 1234);
    }

    #[test]
    fn test_toml_output_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.toml");
        let original = EngineConfig::default()
            .with_storage_dir(dir.path())
            .with_remote("jina", "jk");
        std::fs::write(&path, original.to_toml().unwrap()).unwrap();

        let loaded = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.embedding.provider.as_deref(), Some("jina"));
        assert_eq!(loaded.storage_dir, dir.path());
    }
}
