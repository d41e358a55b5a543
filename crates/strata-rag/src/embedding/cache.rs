//! Per-backend embedding vector cache

use crate::error::StrataResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// A cached vector and the content hash it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEmbedding {
    pub embedding: Vec<f32>,
    pub hash: String,
}

/// In-memory `path -> vector` map persisted to
/// `<dir>/embeddings-<identity>.json`.
///
/// Every vector in one file has the same length. A file whose vectors do not
/// match the active backend's dimensionality is ignored as a whole.
///
/// Only changed contents are written back, and never under an identity other
/// than the one last loaded.
#[derive(Debug)]
pub struct EmbeddingCache {
    dir: Option<PathBuf>,
    entries: RwLock<HashMap<String, CachedEmbedding>>,
    loaded: RwLock<Option<String>>,
    dirty: AtomicBool,
}

impl EmbeddingCache {
    /// Create a cache. With `dir = None` nothing is persisted.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            entries: RwLock::new(HashMap::new()),
            loaded: RwLock::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    /// File backing the cache for a backend identity
    pub fn file_path(&self, identity: &str) -> Option<PathBuf> {
        let safe: String = identity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("embeddings-{safe}.json")))
    }

    /// Replace the in-memory contents with the file for `identity`.
    ///
    /// Returns the number of entries loaded. Missing, unreadable and
    /// mismatched files all result in an empty cache.
    pub async fn load(&self, identity: &str, expected_dimensions: usize) -> usize {
        self.clear();
        self.dirty.store(false, Ordering::Release);
        *self.loaded.write() = Some(identity.to_string());
        let Some(path) = self.file_path(identity) else {
            return 0;
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read embedding cache");
                return 0;
            }
        };

        let entries: HashMap<String, CachedEmbedding> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Embedding cache is malformed, discarding");
                return 0;
            }
        };

        if let Some(first) = entries.values().next() {
            if expected_dimensions > 0 && first.embedding.len() != expected_dimensions {
                info!(
                    identity = identity,
                    cached = first.embedding.len(),
                    expected = expected_dimensions,
                    "Embedding dimensions changed, discarding cache"
                );
                return 0;
            }
        }

        let count = entries.len();
        *self.entries.write() = entries;
        debug!(identity = identity, entries = count, "Loaded embedding cache");
        count
    }

    /// Write the current contents for `identity`.
    ///
    /// A no-op when nothing changed since the last load or save, or when the
    /// contents were loaded for a different identity.
    pub async fn save(&self, identity: &str) -> StrataResult<()> {
        let Some(path) = self.file_path(identity) else {
            return Ok(());
        };
        if let Some(loaded) = self.loaded.read().as_deref() {
            if loaded != identity {
                debug!(loaded = loaded, identity = identity, "Skipping save of cache loaded for another backend");
                return Ok(());
            }
        }
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_file(&path).await;
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    async fn write_file(&self, path: &Path) -> StrataResult<()> {
        let bytes = serde_json::to_vec(&*self.entries.read())?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Whether the contents changed since the last load or save
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Cached vector for `path` if it was computed from `hash`
    pub fn get(&self, path: &str, hash: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .get(path)
            .filter(|entry| entry.hash == hash)
            .map(|entry| entry.embedding.clone())
    }

    pub fn insert(&self, path: impl Into<String>, hash: impl Into<String>, embedding: Vec<f32>) {
        self.entries.write().insert(
            path.into(),
            CachedEmbedding {
                embedding,
                hash: hash.into(),
            },
        );
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Directory holding the cache files
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        cache.insert("src/a.rs", "h1", vec![0.5, 0.5]);
        cache.save("openai").await.unwrap();

        assert!(dir.path().join("embeddings-openai.json").is_file());

        let reloaded = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        assert_eq!(reloaded.load("openai", 2).await, 1);
        assert_eq!(reloaded.get("src/a.rs", "h1"), Some(vec![0.5, 0.5]));
        assert_eq!(reloaded.get("src/a.rs", "h2"), None);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_discards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        cache.insert("a", "h", vec![1.0; 384]);
        cache.insert("b", "h", vec![1.0; 384]);
        cache.save("all-MiniLM-L6-v2").await.unwrap();

        let reloaded = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        assert_eq!(reloaded.load("all-MiniLM-L6-v2", 768).await, 0);
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.get("a", "h"), None);
    }

    #[tokio::test]
    async fn test_identities_are_partitioned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        cache.insert("a", "h", vec![1.0]);
        cache.save("voyage").await.unwrap();

        assert_eq!(cache.load("jina", 1).await, 0);
        assert!(cache.is_empty());
        assert_eq!(cache.load("voyage", 1).await, 1);
    }

    #[tokio::test]
    async fn test_malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("embeddings-openai.json"), b"{not json").unwrap();
        let cache = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        assert_eq!(cache.load("openai", 1536).await, 0);
    }

    #[tokio::test]
    async fn test_unchanged_cache_does_not_overwrite_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        cache.insert("a", "h", vec![1.0, 0.0]);
        cache.save("all-MiniLM-L6-v2").await.unwrap();
        assert!(!cache.is_dirty());
        let file = dir.path().join("embeddings-all-MiniLM-L6-v2.json");
        let before = std::fs::read(&file).unwrap();

        // Never loaded, never changed
        let fresh = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        fresh.save("all-MiniLM-L6-v2").await.unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), before);

        // Loaded for one backend, saved for another
        let other = EmbeddingCache::new(Some(dir.path().to_path_buf()));
        assert_eq!(other.load("openai", 2).await, 0);
        other.insert("b", "h", vec![0.0, 1.0]);
        other.save("all-MiniLM-L6-v2").await.unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), before);
    }

    #[test]
    fn test_identity_is_sanitized() {
        let cache = EmbeddingCache::new(Some(PathBuf::from("/cache")));
        assert_eq!(
            cache.file_path("BAAI/bge-m3").unwrap(),
            PathBuf::from("/cache/embeddings-BAAI_bge-m3.json")
        );
    }
}
