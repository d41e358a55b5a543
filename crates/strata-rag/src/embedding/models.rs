//! Known remote providers and local models

use serde::Serialize;

/// Defaults for a remote embedding provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderPreset {
    /// Provider flag, e.g. `openai`
    pub name: &'static str,

    /// Embeddings endpoint
    pub base_url: &'static str,

    /// Model used when the caller does not pick one
    pub default_model: &'static str,

    /// Dimensionality of the default model
    pub dimensions: usize,

    /// Maximum input tokens per text
    pub max_input_tokens: usize,
}

/// A local model from the built-in catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalModelSpec {
    /// Full model id
    pub id: &'static str,

    /// Short name, used for cache partitioning and the model directory
    pub short_name: &'static str,

    /// Output dimensionality
    pub dimensions: usize,

    /// Maximum input tokens
    pub max_tokens: usize,

    /// Approximate download size in megabytes
    pub size_mb: u32,

    /// Hugging Face repository holding the ONNX export
    pub repository: &'static str,
}

pub const PROVIDER_PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1/embeddings",
        default_model: "text-embedding-3-small",
        dimensions: 1536,
        max_input_tokens: 8191,
    },
    ProviderPreset {
        name: "voyage",
        base_url: "https://api.voyageai.com/v1/embeddings",
        default_model: "voyage-code-3",
        dimensions: 1024,
        max_input_tokens: 32000,
    },
    ProviderPreset {
        name: "jina",
        base_url: "https://api.jina.ai/v1/embeddings",
        default_model: "jina-embeddings-v3",
        dimensions: 1024,
        max_input_tokens: 8192,
    },
    ProviderPreset {
        name: "mistral",
        base_url: "https://api.mistral.ai/v1/embeddings",
        default_model: "mistral-embed",
        dimensions: 1024,
        max_input_tokens: 8192,
    },
    ProviderPreset {
        name: "siliconflow",
        base_url: "https://api.siliconflow.cn/v1/embeddings",
        default_model: "BAAI/bge-m3",
        dimensions: 1024,
        max_input_tokens: 8192,
    },
];

pub const LOCAL_MODELS: &[LocalModelSpec] = &[
    LocalModelSpec {
        id: "Xenova/all-MiniLM-L6-v2",
        short_name: "all-MiniLM-L6-v2",
        dimensions: 384,
        max_tokens: 256,
        size_mb: 23,
        repository: "Xenova/all-MiniLM-L6-v2",
    },
    LocalModelSpec {
        id: "Xenova/bge-small-en-v1.5",
        short_name: "bge-small-en-v1.5",
        dimensions: 384,
        max_tokens: 512,
        size_mb: 33,
        repository: "Xenova/bge-small-en-v1.5",
    },
    LocalModelSpec {
        id: "Xenova/bge-base-en-v1.5",
        short_name: "bge-base-en-v1.5",
        dimensions: 768,
        max_tokens: 512,
        size_mb: 110,
        repository: "Xenova/bge-base-en-v1.5",
    },
    LocalModelSpec {
        id: "Xenova/paraphrase-multilingual-MiniLM-L12-v2",
        short_name: "paraphrase-multilingual-MiniLM-L12-v2",
        dimensions: 384,
        max_tokens: 128,
        size_mb: 118,
        repository: "Xenova/paraphrase-multilingual-MiniLM-L12-v2",
    },
    LocalModelSpec {
        id: "jinaai/jina-embeddings-v2-base-code",
        short_name: "jina-embeddings-v2-base-code",
        dimensions: 768,
        max_tokens: 8192,
        size_mb: 161,
        repository: "jinaai/jina-embeddings-v2-base-code",
    },
];

/// Model used when none is selected
pub const DEFAULT_LOCAL_MODEL: &str = "Xenova/all-MiniLM-L6-v2";

/// Look up a provider preset by flag (case-insensitive)
pub fn provider_preset(name: &str) -> Option<&'static ProviderPreset> {
    PROVIDER_PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
}

/// Look up a catalog model by full id or short name
pub fn local_model(id: &str) -> Option<&'static LocalModelSpec> {
    LOCAL_MODELS
        .iter()
        .find(|spec| spec.id == id || spec.short_name == id)
}

/// The default catalog entry
pub fn default_local_model() -> &'static LocalModelSpec {
    &LOCAL_MODELS[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id_and_short_name() {
        assert_eq!(local_model("bge-base-en-v1.5").unwrap().dimensions, 768);
        assert_eq!(
            local_model("Xenova/all-MiniLM-L6-v2").unwrap().short_name,
            "all-MiniLM-L6-v2"
        );
        assert!(local_model("unknown-model").is_none());
        assert_eq!(default_local_model().id, DEFAULT_LOCAL_MODEL);
    }

    #[test]
    fn test_provider_lookup_ignores_case() {
        let preset = provider_preset("OpenAI").unwrap();
        assert_eq!(preset.dimensions, 1536);
        assert!(provider_preset("nope").is_none());
    }
}
