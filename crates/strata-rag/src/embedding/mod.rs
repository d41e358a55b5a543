//! # Embedding engine
//!
//! Produces fixed-dimension vectors for text using either a remote
//! OpenAI-compatible embedding API or a locally resident ONNX model.
//!
//! - [`RemoteEmbedder`]: HTTP client with provider presets, rate limiting,
//!   batching and index-ordered responses.
//! - [`LocalEmbedder`]: model catalog, download with progress and
//!   cancellation, and a bounded retry policy for native loader failures and
//!   corrupted artifacts.
//! - [`EmbeddingCache`]: per-backend vector cache persisted as a flat JSON
//!   file, discarded wholesale on dimensionality mismatch.
//! - [`EmbeddingEngine`]: composes the above, with remote-to-local fallback,
//!   semantic search and a worker-pool preload.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_rag::embedding::EmbeddingEngine;
//!
//! # async fn example(runtime: Arc<dyn strata_rag::embedding::LocalRuntime>) -> strata_rag::StrataResult<()> {
//! let engine = EmbeddingEngine::new(runtime, Some("/tmp/strata/embeddings".into()));
//! engine.configure_remote("openai", "sk-...", None, None)?;
//! engine.initialize().await?;
//! let vector = engine.embed("fn parse_tokens()").await;
//! # Ok(())
//! # }
//! ```

mod cache;
mod engine;
#[cfg(feature = "local-embeddings")]
mod fastembed_runtime;
mod local;
pub mod models;
mod remote;

pub use cache::{CachedEmbedding, EmbeddingCache};
pub use engine::{
    EmbeddingEngine, EmbeddingMode, EmbeddingStats, PreloadProgress, PreloadReport,
    PreloadSettings, SearchHit,
};
#[cfg(feature = "local-embeddings")]
pub use fastembed_runtime::FastembedRuntime;
pub use local::{
    DisabledRuntime, ExecutionBackend, LoadOutcome, LoadProgress, LocalEmbedder, LocalPipeline,
    LocalRuntime, ProgressObserver, RuntimeError,
};
#[cfg(test)]
pub(crate) use local::testing;
pub use models::{LocalModelSpec, ProviderPreset};
pub use remote::{RateLimiter, RemoteConfig, RemoteEmbedder};

use crate::error::StrataResult;

/// Capability shared by every embedding backend
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. An error means no vector is available.
    async fn embed(&self, text: &str) -> StrataResult<Vec<f32>>;

    /// Vector dimensionality produced by this backend
    fn dimensions(&self) -> usize;

    /// Backend identity used to partition the vector cache
    fn identity(&self) -> String;
}

/// Cosine similarity of two vectors. Zero when either norm is zero or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Scale a vector to unit length in place
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Truncate to at most `max_chars` characters on a char boundary
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("上下文", 1), "上");
    }
}
