//! # Persistent key-value storage
//!
//! Every persisted structure in Strata sits on an ordered key-value store
//! with prefix iteration and atomic batches. Keys are namespaced with `::`
//! separators (`tier::src/lib.rs`, `pref::language`), values are JSON.
//!
//! Two backends implement [`Memory`]:
//!
//! - [`SledStorage`]: durable, opened asynchronously on construction. If the
//!   open fails or the store has been closed, every operation returns
//!   [`StrataError::StoreUnavailable`](crate::StrataError::StoreUnavailable)
//!   so callers can continue without caching.
//! - [`InMemoryStorage`]: a `BTreeMap`, used for tests and ephemeral sessions.

mod in_memory;
mod sled_store;

pub use in_memory::InMemoryStorage;
pub use sled_store::SledStorage;

use crate::error::StrataResult;
use futures::stream::BoxStream;
use serde_json::Value;

/// Lazy, key-ordered stream of `(key, value)` pairs
pub type EntryStream = BoxStream<'static, StrataResult<(String, Value)>>;

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Put { key: String, value: Value },
    Delete { key: String },
}

impl BatchOp {
    /// Create a put operation
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self::Put {
            key: key.into(),
            value,
        }
    }

    /// Create a delete operation
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Key the operation targets
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Range selection for iteration
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Restrict to keys starting with this prefix
    pub prefix: Option<String>,

    /// Maximum number of entries to yield
    pub limit: Option<usize>,
}

impl MemoryQuery {
    /// Query over the whole keyspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Limit the number of entries
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Ordered, durable key-value storage
#[async_trait::async_trait]
pub trait Memory: Send + Sync {
    /// Backend name used in logs and errors
    fn backend_name(&self) -> &str;

    /// Fetch a value
    async fn get(&self, key: &str) -> StrataResult<Option<Value>>;

    /// Store a value, overwriting any previous one
    async fn set(&self, key: &str, value: Value) -> StrataResult<()>;

    /// Delete a value. Returns whether the key existed; absent keys are not an error.
    async fn delete(&self, key: &str) -> StrataResult<bool>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> StrataResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Apply puts and deletes in order, all-or-nothing, durably
    async fn batch(&self, ops: Vec<BatchOp>) -> StrataResult<()>;

    /// Iterate entries in lexicographic key order
    async fn entries(&self, query: &MemoryQuery) -> StrataResult<EntryStream>;

    /// List keys in lexicographic order
    async fn keys(&self, query: &MemoryQuery) -> StrataResult<Vec<String>> {
        use futures::TryStreamExt;

        self.entries(query)
            .await?
            .map_ok(|(key, _)| key)
            .try_collect()
            .await
    }

    /// Remove every key, or every key under a prefix
    async fn clear(&self, prefix: Option<&str>) -> StrataResult<()>;

    /// Count keys, optionally under a prefix
    async fn count(&self, prefix: Option<&str>) -> StrataResult<usize>;

    /// Persist buffered writes
    async fn flush(&self) -> StrataResult<()> {
        Ok(())
    }

    /// Release the underlying handle; later operations report unavailability
    async fn close(&self) -> StrataResult<()>;
}
