//! Tiered context store: in-memory mirror with write-behind persistence

use super::describer::ContextDescriber;
use super::parser::{extension, file_name, is_config, RegexStructureParser, StructureParser};
use super::types::{FileStructure, ResourceTier, TierStats};
use crate::document::Document;
use crate::error::StrataResult;
use crate::storage::{BatchOp, Memory, MemoryQuery};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "tier::";

/// Separator between L1 digests in [`TieredContextStore::get_l1_batch`]
pub const L1_SEPARATOR: &str = "\n\n---\n\n";

/// Limits applied when rendering digests
#[derive(Debug, Clone)]
pub struct TierLimits {
    /// Classes listed in L0
    pub l0_classes: usize,

    /// Functions listed in L0
    pub l0_functions: usize,

    /// Exports listed in L0
    pub l0_exports: usize,

    /// Imports listed in L1
    pub l1_imports: usize,

    /// Leading content lines excerpted in L1
    pub l1_excerpt_lines: usize,

    /// Pending writes that trigger a flush
    pub flush_every: usize,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            l0_classes: 3,
            l0_functions: 5,
            l0_exports: 3,
            l1_imports: 15,
            l1_excerpt_lines: 60,
            flush_every: 50,
        }
    }
}

fn key(path: &str) -> String {
    format!("{KEY_PREFIX}{path}")
}

fn approx_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Serves L0/L1 digests per resource, keyed by path and memoized by content
/// hash
pub struct TieredContextStore {
    storage: Arc<dyn Memory>,
    parser: Arc<dyn StructureParser>,
    describer: Option<Arc<dyn ContextDescriber>>,
    limits: TierLimits,
    tiers: RwLock<HashMap<String, ResourceTier>>,
    pending: Mutex<Vec<BatchOp>>,
}

impl TieredContextStore {
    /// Create a store persisting to `storage` with the default parser
    pub fn new(storage: Arc<dyn Memory>) -> Self {
        Self {
            storage,
            parser: Arc::new(RegexStructureParser::new()),
            describer: None,
            limits: TierLimits::default(),
            tiers: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn StructureParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Add a summary line to every L1 digest
    pub fn with_describer(mut self, describer: Arc<dyn ContextDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn with_limits(mut self, limits: TierLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Fill the mirror from the durable store. Malformed entries are skipped;
    /// an unavailable store leaves the mirror empty.
    pub async fn load(&self) -> usize {
        let mut stream = match self
            .storage
            .entries(&MemoryQuery::new().with_prefix(KEY_PREFIX))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Tier store unavailable, starting with an empty cache");
                return 0;
            }
        };

        let mut loaded = HashMap::new();
        let mut skipped = 0usize;
        while let Some(entry) = stream.next().await {
            match entry.and_then(|(_, value)| Ok(serde_json::from_value::<ResourceTier>(value)?)) {
                Ok(tier) => {
                    loaded.insert(tier.path.clone(), tier);
                }
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "Skipping unreadable tier entry");
                }
            }
        }

        let count = loaded.len();
        self.tiers.write().extend(loaded);
        info!(tiers = count, skipped = skipped, "Loaded tiered context");
        count
    }

    /// Return the tier for `path`, regenerating it only when `hash` changed
    pub async fn generate_tier(&self, path: &str, content: &str, hash: &str) -> ResourceTier {
        if let Some(tier) = self.cached(path, hash) {
            return tier;
        }

        let tier = self.build_tier(path, content, hash).await;
        self.tiers.write().insert(path.to_string(), tier.clone());

        let should_flush = {
            let mut pending = self.pending.lock();
            match serde_json::to_value(&tier) {
                Ok(value) => pending.push(BatchOp::put(key(path), value)),
                Err(e) => warn!(path = path, error = %e, "Failed to serialize tier"),
            }
            pending.len() >= self.limits.flush_every
        };
        if should_flush {
            self.flush_pending().await;
        }

        tier
    }

    /// Generate tiers for every document whose hash is not cached.
    ///
    /// Returns the number of new tiers.
    pub async fn batch_generate(
        &self,
        docs: &[Document],
        on_progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> usize {
        let mut generated = 0;
        // Queued single writes go first so each key lands in generation order
        let mut batch = std::mem::take(&mut *self.pending.lock());

        for (i, doc) in docs.iter().enumerate() {
            if self.cached(&doc.path, &doc.hash).is_none() {
                let tier = self.build_tier(&doc.path, &doc.content, &doc.hash).await;
                match serde_json::to_value(&tier) {
                    Ok(value) => batch.push(BatchOp::put(key(&doc.path), value)),
                    Err(e) => warn!(path = %doc.path, error = %e, "Failed to serialize tier"),
                }
                self.tiers.write().insert(doc.path.clone(), tier);
                generated += 1;

                if batch.len() >= self.limits.flush_every {
                    self.write(std::mem::take(&mut batch)).await;
                }
            }
            if let Some(on_progress) = on_progress {
                on_progress(i + 1, docs.len());
            }
        }
        self.write(batch).await;

        info!(total = docs.len(), generated = generated, "Batch tier generation finished");
        generated
    }

    fn cached(&self, path: &str, hash: &str) -> Option<ResourceTier> {
        self.tiers
            .read()
            .get(path)
            .filter(|tier| tier.hash == hash)
            .cloned()
    }

    async fn build_tier(&self, path: &str, content: &str, hash: &str) -> ResourceTier {
        let structure = self.parser.parse(content, path);
        let description = match &self.describer {
            Some(describer) => describer.describe(path, content, &structure).await,
            None => None,
        };

        ResourceTier {
            path: path.to_string(),
            hash: hash.to_string(),
            l0: self.render_l0(path, &structure),
            l1: self.render_l1(path, content, &structure, description.as_deref()),
            structure,
            updated_at: chrono::Utc::now(),
        }
    }

    fn render_l0(&self, path: &str, structure: &FileStructure) -> String {
        let mut line = format!("{} [{}]", file_name(path), structure.kind);

        let sections = [
            ("classes", &structure.classes, self.limits.l0_classes),
            ("fns", &structure.functions, self.limits.l0_functions),
            ("exports", &structure.exports, self.limits.l0_exports),
        ];
        let rendered: Vec<String> = sections
            .iter()
            .filter(|(_, names, _)| !names.is_empty())
            .map(|(label, names, limit)| {
                let names: Vec<&str> = names.iter().take(*limit).map(String::as_str).collect();
                format!("{label}: {}", names.join(", "))
            })
            .collect();

        if !rendered.is_empty() {
            line.push(' ');
            line.push_str(&rendered.join(" | "));
        }
        line
    }

    fn render_l1(
        &self,
        path: &str,
        content: &str,
        structure: &FileStructure,
        description: Option<&str>,
    ) -> String {
        let ext = extension(path);
        let mut lines = vec![format!("## {path}")];

        if ext.is_empty() {
            lines.push(format!("Kind: {}", structure.kind));
        } else {
            lines.push(format!("Kind: {} (.{ext})", structure.kind));
        }
        if let Some(description) = description {
            lines.push(format!("Summary: {description}"));
        }
        if !structure.classes.is_empty() {
            lines.push(format!("Classes: {}", structure.classes.join(", ")));
        }
        if !structure.functions.is_empty() {
            lines.push(format!("Functions: {}", structure.functions.join(", ")));
        }
        if !structure.imports.is_empty() {
            let shown: Vec<&str> = structure
                .imports
                .iter()
                .take(self.limits.l1_imports)
                .map(String::as_str)
                .collect();
            let hidden = structure.imports.len() - shown.len();
            if hidden > 0 {
                lines.push(format!("Imports: {} (+{hidden} more)", shown.join(", ")));
            } else {
                lines.push(format!("Imports: {}", shown.join(", ")));
            }
        }
        if !structure.exports.is_empty() {
            lines.push(format!("Exports: {}", structure.exports.join(", ")));
        }

        if !is_config(path) && !content.is_empty() {
            lines.push(String::new());
            lines.push(format!("```{ext}"));
            lines.extend(
                content
                    .lines()
                    .take(self.limits.l1_excerpt_lines)
                    .map(str::to_string),
            );
            lines.push("```".to_string());
        }

        lines.join("\n")
    }

    /// Cached tier for a path
    pub fn get_tier(&self, path: &str) -> Option<ResourceTier> {
        self.tiers.read().get(path).cloned()
    }

    /// L0 lines for the given paths, newline separated. Unknown paths are skipped.
    pub fn get_l0_batch<S: AsRef<str>>(&self, paths: &[S]) -> String {
        let tiers = self.tiers.read();
        paths
            .iter()
            .filter_map(|path| tiers.get(path.as_ref()))
            .map(|tier| tier.l0.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// L1 digests for the given paths joined by [`L1_SEPARATOR`]. Unknown
    /// paths are skipped.
    pub fn get_l1_batch<S: AsRef<str>>(&self, paths: &[S]) -> String {
        let tiers = self.tiers.read();
        paths
            .iter()
            .filter_map(|path| tiers.get(path.as_ref()))
            .map(|tier| tier.l1.as_str())
            .collect::<Vec<_>>()
            .join(L1_SEPARATOR)
    }

    /// L0 lines of every cached path starting with `prefix`, sorted by path.
    ///
    /// Matching is a plain string prefix, so `src/rag` also matches
    /// `src/rag_old/`.
    pub fn get_directory_l0(&self, prefix: &str) -> String {
        let tiers = self.tiers.read();
        let mut matches: Vec<&ResourceTier> = tiers
            .values()
            .filter(|tier| tier.path.starts_with(prefix))
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path));
        matches
            .into_iter()
            .map(|tier| tier.l0.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn get_stats(&self) -> TierStats {
        let tiers = self.tiers.read();
        tiers.values().fold(
            TierStats {
                resources: tiers.len(),
                ..Default::default()
            },
            |mut stats, tier| {
                stats.l0_tokens += approx_tokens(&tier.l0);
                stats.l1_tokens += approx_tokens(&tier.l1);
                stats
            },
        )
    }

    async fn write(&self, ops: Vec<BatchOp>) {
        if ops.is_empty() {
            return;
        }
        let count = ops.len();
        match self.storage.batch(ops).await {
            Ok(()) => debug!(ops = count, "Flushed tiers"),
            Err(e) if e.is_unavailable() => {
                debug!(ops = count, error = %e, "Tier store unavailable, keeping tiers in memory only")
            }
            Err(e) => warn!(ops = count, error = %e, "Failed to persist tiers"),
        }
    }

    async fn flush_pending(&self) {
        let ops = std::mem::take(&mut *self.pending.lock());
        self.write(ops).await;
    }

    /// Persist pending single writes
    pub async fn flush(&self) -> StrataResult<()> {
        self.flush_pending().await;
        Ok(())
    }

    /// Drop every tier from the mirror and the durable store
    pub async fn clear(&self) -> StrataResult<()> {
        self.tiers.write().clear();
        self.pending.lock().clear();
        match self.storage.clear(Some(KEY_PREFIX)).await {
            Err(e) if e.is_unavailable() => Ok(()),
            other => other,
        }
    }

    /// Flush and release the durable store
    pub async fn close(&self) -> StrataResult<()> {
        self.flush_pending().await;
        self.storage.close().await
    }

    /// Number of writes waiting for the next flush
    pub fn pending_writes(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::tiered::describer::HeuristicDescriber;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts parse calls while delegating to the regex parser
    struct SpyParser {
        calls: AtomicUsize,
        inner: RegexStructureParser,
    }

    impl StructureParser for SpyParser {
        fn parse(&self, content: &str, path: &str) -> FileStructure {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.parse(content, path)
        }
    }

    fn spy() -> Arc<SpyParser> {
        Arc::new(SpyParser {
            calls: AtomicUsize::new(0),
            inner: RegexStructureParser::new(),
        })
    }

    const SOURCE_V1: &str = "export function alpha() {}\nexport class Store {}\n";
    const SOURCE_V2: &str = "export function beta() {}\n";

    #[tokio::test]
    async fn test_generate_tier_is_memoized_by_hash() {
        let parser = spy();
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new())).with_parser(parser.clone());

        let first = store.generate_tier("src/a.ts", SOURCE_V1, "h1").await;
        let second = store.generate_tier("src/a.ts", SOURCE_V1, "h1").await;

        assert_eq!(first, second);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hash_change_regenerates() {
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new()));

        let old = store.generate_tier("src/a.ts", SOURCE_V1, "h1").await;
        let new = store.generate_tier("src/a.ts", SOURCE_V2, "h2").await;

        assert_ne!(old.structure.functions, new.structure.functions);
        assert_eq!(new.structure.functions, vec!["beta"]);
        assert_eq!(store.get_tier("src/a.ts").unwrap().hash, "h2");
    }

    #[tokio::test]
    async fn test_l0_and_l1_rendering() {
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new()))
            .with_describer(Arc::new(HeuristicDescriber));
        let source = "import x from 'x';\nexport function a() {}\nfunction b() {}\nfunction c() {}\nfunction d() {}\nfunction e() {}\nfunction f() {}\n";

        let tier = store.generate_tier("src/funcs.ts", source, "h").await;
        assert_eq!(
            tier.l0,
            "funcs.ts [module] fns: a, b, c, d, e | exports: a"
        );
        assert!(tier.l1.starts_with("## src/funcs.ts\nKind: module (.ts)\nSummary: "));
        assert!(tier.l1.contains("Functions: a, b, c, d, e, f"));
        assert!(tier.l1.contains("Imports: x"));
        assert!(tier.l1.contains("```ts\nimport x from 'x';"));
    }

    #[tokio::test]
    async fn test_l1_caps_imports_and_excerpt() {
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new()));
        let mut source: String = (0..20).map(|i| format!("import m{i}\n")).collect();
        source.push_str(&(0..100).map(|i| format!("# line {i}\n")).collect::<String>());

        let tier = store.generate_tier("tool.py", &source, "h").await;
        assert!(tier.l1.contains("(+5 more)"));
        assert!(tier.l1.contains("# line 39"));
        assert!(!tier.l1.contains("# line 40"));
    }

    #[tokio::test]
    async fn test_config_files_have_no_excerpt() {
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new()));
        let tier = store.generate_tier("Cargo.toml", "[package]\nname = \"x\"\n", "h").await;
        assert!(tier.l0.starts_with("Cargo.toml [config]"));
        assert!(!tier.l1.contains("```"));
    }

    #[tokio::test]
    async fn test_batch_reads_skip_unknown_paths() {
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new()));
        store.generate_tier("a.rs", "fn a() {}", "1").await;
        store.generate_tier("b.rs", "fn b() {}", "1").await;

        let l0 = store.get_l0_batch(&["a.rs", "missing.rs", "b.rs"]);
        assert_eq!(l0, "a.rs [script] fns: a\nb.rs [script] fns: b");

        let l1 = store.get_l1_batch(&["a.rs", "b.rs"]);
        assert_eq!(l1.matches(L1_SEPARATOR).count(), 1);
        assert!(store.get_l1_batch(&["missing.rs"]).is_empty());
    }

    #[tokio::test]
    async fn test_directory_l0_uses_prefix() {
        let store = TieredContextStore::new(Arc::new(InMemoryStorage::new()));
        store.generate_tier("src/rag/a.rs", "fn a() {}", "1").await;
        store.generate_tier("src/rag/deep/b.rs", "fn b() {}", "1").await;
        store.generate_tier("src/other/c.rs", "fn c() {}", "1").await;

        let listing = store.get_directory_l0("src/rag/");
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.contains("a.rs"));
        assert!(listing.contains("b.rs"));
        assert!(!listing.contains("c.rs"));
    }

    #[tokio::test]
    async fn test_batch_generate_flushes_in_chunks() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = TieredContextStore::new(storage.clone());
        let docs: Vec<Document> = (0..120)
            .map(|i| Document::new(format!("src/f{i}.rs"), format!("fn f{i}() {{}}"), "h"))
            .collect();

        let progress = AtomicUsize::new(0);
        let generated = store
            .batch_generate(&docs, Some(&|done: usize, _total: usize| {
                progress.store(done, Ordering::SeqCst);
            }))
            .await;

        assert_eq!(generated, 120);
        assert_eq!(progress.load(Ordering::SeqCst), 120);
        assert_eq!(storage.count(Some(KEY_PREFIX)).await.unwrap(), 120);
        assert_eq!(store.batch_generate(&docs, None).await, 0);
    }

    #[tokio::test]
    async fn test_single_writes_flush_every_fifty() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = TieredContextStore::new(storage.clone());

        for i in 0..49 {
            store.generate_tier(&format!("f{i}.rs"), "fn x() {}", "h").await;
        }
        assert_eq!(storage.count(None).await.unwrap(), 0);
        assert_eq!(store.pending_writes(), 49);

        store.generate_tier("f49.rs", "fn x() {}", "h").await;
        assert_eq!(storage.count(None).await.unwrap(), 50);
        assert_eq!(store.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_batch_after_single_write_keeps_newest_durable() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = TieredContextStore::new(storage.clone());

        store.generate_tier("a.ts", SOURCE_V1, "h1").await;
        assert_eq!(store.pending_writes(), 1);
        store
            .batch_generate(&[Document::new("a.ts", SOURCE_V2, "h2")], None)
            .await;
        assert_eq!(store.pending_writes(), 0);
        store.flush().await.unwrap();

        let durable = storage.get("tier::a.ts").await.unwrap().unwrap();
        assert_eq!(durable["hash"], "h2");
        assert_eq!(store.get_tier("a.ts").unwrap().hash, "h2");
    }

    #[tokio::test]
    async fn test_load_restores_mirror_and_skips_malformed() {
        let storage = Arc::new(InMemoryStorage::new());
        {
            let store = TieredContextStore::new(storage.clone());
            store.generate_tier("a.rs", "fn a() {}", "1").await;
            store.flush().await.unwrap();
        }
        storage.set("tier::broken.rs", json!({"path": 42})).await.unwrap();

        let store = TieredContextStore::new(storage.clone());
        assert_eq!(store.load().await, 1);
        assert_eq!(store.get_tier("a.rs").unwrap().hash, "1");

        let stats = store.get_stats();
        assert_eq!(stats.resources, 1);
        assert!(stats.l1_tokens >= stats.l0_tokens);

        store.clear().await.unwrap();
        assert_eq!(storage.count(Some(KEY_PREFIX)).await.unwrap(), 0);
        assert!(store.get_tier("a.rs").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.close().await.unwrap();
        let store = TieredContextStore::new(storage);

        assert_eq!(store.load().await, 0);
        let tier = store.generate_tier("a.rs", "fn a() {}", "1").await;
        store.flush().await.unwrap();
        assert_eq!(store.get_tier("a.rs"), Some(tier));
    }
}
