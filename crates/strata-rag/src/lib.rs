//! # Strata RAG
//!
//! Local retrieval engine that keeps long-running LLM sessions inside a
//! bounded context budget:
//!
//! - **Tiered context**: L0 one-line and L1 multi-line digests per file,
//!   memoized by content hash and persisted to an embedded store
//! - **Embeddings**: remote OpenAI-compatible providers with a local ONNX
//!   model fallback, cached per backend and invalidated on content change
//! - **Session memory**: user preferences learned from messages and
//!   resolutions that worked before
//! - **History compression**: older exchanges folded into one summary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata_rag::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load(None)?;
//!     let engine = ContextEngine::open(config).await?;
//!
//!     engine
//!         .index(&[Document::new("src/lib.rs", "pub fn run() {}", "v1")])
//!         .await;
//!     engine
//!         .memory()
//!         .extract_from_user_message("I prefer Rust", "session-1")
//!         .await;
//!
//!     println!("{}", engine.build_context(&["src/lib.rs"], None));
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `local-embeddings` (default): local models through `fastembed`
//! - `llm-descriptions` (default): L1 summaries from a chat-completion model

#![doc(html_root_url = "https://docs.rs/strata-rag/0.1.0")]

pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod history;
pub mod memory;
pub mod storage;
pub mod tiered;

pub use config::EngineConfig;
pub use document::Document;
pub use engine::ContextEngine;
pub use error::{StrataError, StrataResult};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::config::{EngineConfig, LlmSettings};
    pub use crate::document::Document;
    pub use crate::embedding::{Embedder, EmbeddingEngine, EmbeddingMode, SearchHit};
    pub use crate::engine::ContextEngine;
    pub use crate::error::{StrataError, StrataResult};
    pub use crate::history::{CompressionOptions, Exchange, ExchangeNode, HistoryCompressor};
    pub use crate::memory::{Experience, Preference, SessionMemory};
    pub use crate::storage::{InMemoryStorage, Memory, SledStorage};
    pub use crate::tiered::{ResourceTier, TieredContextStore};
}
