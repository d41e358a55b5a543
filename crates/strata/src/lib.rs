//! # Strata
//!
//! Context plumbing for AI coding assistants:
//!
//! - **Strata RAG**: tiered file digests, dual-mode embeddings, session
//!   memory and history compression over an embedded store
//! - **Strata LLM**: OpenAI-compatible chat client used for file descriptions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ContextEngine::open(EngineConfig::default()).await?;
//!     engine.initialize_embeddings().await?;
//!
//!     let docs = vec![Document::new("src/main.rs", "fn main() {}", "v1")];
//!     engine.index(&docs).await;
//!     let hits = engine.embeddings().semantic_search("entry point", &docs, 5).await;
//!     println!("{hits:?}");
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!            strata
//!              |
//!      +-------+-------+
//!      |               |
//!  strata-rag ---> strata-llm
//! ```

#![doc(html_root_url = "https://docs.rs/strata/0.1.0")]
#![warn(missing_docs)]

// Re-export sub-crates
#[cfg(feature = "llm")]
pub use strata_llm as llm;

#[cfg(feature = "rag")]
pub use strata_rag as rag;

/// Commonly used types and traits
pub mod prelude {
    #[cfg(feature = "llm")]
    pub use crate::llm::{ChatMessage, ChatResponse, Client, ClientConfig, MessageRole};

    #[cfg(feature = "rag")]
    pub use crate::rag::prelude::*;
}
