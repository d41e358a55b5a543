//! # Tiered Context Demo
//!
//! Walks through the engine on a small in-memory project:
//!
//! 1. Tier generation (L0 / L1 digests, directory view, memoization)
//! 2. Preference extraction and the memory prompt block
//! 3. History compression
//! 4. Semantic search (opt-in, downloads a local model or uses a remote key)
//!
//! ## Run This Example
//!
//! ```bash
//! cargo run --example tiered_context_demo
//!
//! # With semantic search through the local model
//! STRATA_DEMO_SEARCH=1 cargo run --example tiered_context_demo
//!
//! # With a remote provider
//! STRATA__EMBEDDING__PROVIDER=openai STRATA__EMBEDDING__API_KEY=sk-... \
//!   STRATA_DEMO_SEARCH=1 cargo run --example tiered_context_demo
//! ```

use std::sync::Arc;
use strata_rag::embedding::LoadProgress;
use strata_rag::history::{Exchange, ExchangeNode};
use strata_rag::{ContextEngine, Document, EngineConfig};
use tracing::info;

fn project() -> Vec<Document> {
    vec![
        Document::new(
            "src/storage/mod.rs",
            "use std::sync::Arc;\n\npub trait Store {\n    fn get(&self, key: &str) -> Option<String>;\n}\n\npub struct MemoryStore;\n\npub fn open() -> Arc<MemoryStore> {\n    Arc::new(MemoryStore)\n}\n",
            "v1",
        ),
        Document::new(
            "src/http/server.ts",
            "import express from 'express';\nimport { router } from './routes';\n\nexport class Server {\n  start(port: number) {}\n}\n\nexport function createServer(): Server {\n  return new Server();\n}\n",
            "v1",
        ),
        Document::new(
            "scripts/deploy.sh",
            "#!/bin/sh\nbuild() {\n  cargo build --release\n}\nbuild\n",
            "v1",
        ),
        Document::new(
            "Cargo.toml",
            "[package]\nname = \"demo\"\n\n[dependencies]\nserde = \"1\"\n",
            "v1",
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing (simple fmt for examples)
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("=== Tiered Context Demo ===\n");

    let dir = tempfile::tempdir()?;
    let config = EngineConfig::load(None)?.with_storage_dir(dir.path());
    let engine = ContextEngine::open(config).await?;
    let docs = project();

    // ========================================
    // 1. TIERS
    // ========================================
    info!("=== 1. Tier Generation ===");
    let generated = engine.index(&docs).await;
    info!("Generated {} tiers", generated);

    let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
    info!("L0 batch:\n{}", engine.tiers().get_l0_batch(&paths));
    info!("L1 of src/http/server.ts:\n{}", engine.tiers().get_l1_batch(&["src/http/server.ts"]));
    info!("Directory src/:\n{}", engine.tiers().get_directory_l0("src/"));

    let again = engine.index(&docs).await;
    info!("Re-indexing unchanged files generated {} tiers", again);
    let stats = engine.tiers().get_stats();
    info!(
        "Stats: {} resources, ~{} L0 tokens, ~{} L1 tokens\n",
        stats.resources, stats.l0_tokens, stats.l1_tokens
    );

    // ========================================
    // 2. SESSION MEMORY
    // ========================================
    info!("=== 2. Session Memory ===");
    for message in [
        "I prefer Rust for backend work",
        "We're using axum, and please indent with 4 spaces",
        "我喜欢Rust，请用中文回答",
    ] {
        let found = engine.memory().extract_from_user_message(message, "demo").await;
        for pref in found {
            info!("  {} = {} (confidence {:.1})", pref.key, pref.value, pref.confidence);
        }
    }
    engine
        .memory()
        .record_experience("sled lock held", "second open in same process", "close the first handle")
        .await?;
    info!("Memory prompt:\n{}\n", engine.memory().build_memory_prompt(200));

    // ========================================
    // 3. HISTORY COMPRESSION
    // ========================================
    info!("=== 3. History Compression ===");
    let history: Vec<Exchange> = (0..12)
        .map(|i| {
            Exchange::new(format!("ex-{i}"))
                .with_request(if i % 3 == 0 { "ok".to_string() } else { format!("Step {i}: refactor the store") })
                .with_response_node(ExchangeNode::tool_use(
                    "read_file",
                    format!(r#"{{"path":"src/file{}.rs"}}"#, i % 7),
                ))
        })
        .collect();
    let compressed = engine.compress_history(&history);
    info!(
        "{} exchanges -> {} exchanges",
        compressed.original_count, compressed.compressed_count
    );
    if let Some(ExchangeNode::Text { text }) = compressed.exchanges[0].response_nodes.first() {
        info!("Summary:\n{}\n", text);
    }

    // ========================================
    // 4. SEMANTIC SEARCH
    // ========================================
    if std::env::var("STRATA_DEMO_SEARCH").is_ok() {
        info!("=== 4. Semantic Search ===");
        engine
            .embeddings()
            .set_progress_observer(Arc::new(|event: LoadProgress| {
                if let LoadProgress::Progress { file, percent } = event {
                    info!("  downloading {} {:.0}%", file, percent);
                }
            }));
        let mode = engine.initialize_embeddings().await?;
        info!("Embedding mode: {:?}", mode);

        let report = engine.embeddings().preload_embeddings(&docs, None).await;
        info!("Preload: {:?}", report);
        for hit in engine.embeddings().semantic_search("http server startup", &docs, 2).await {
            info!("  {:.3} {}", hit.score, hit.path);
        }
    }

    engine.shutdown().await?;
    info!("=== Demo Complete ===");
    Ok(())
}
