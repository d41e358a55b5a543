//! Input document type shared by the tiering and embedding pipelines

use serde::{Deserialize, Serialize};

/// A resource to index: its path, raw content and content fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Unique path (the cache key)
    pub path: String,

    /// Raw text content (the L2 tier)
    pub content: String,

    /// Opaque content fingerprint used for invalidation
    pub hash: String,
}

impl Document {
    /// Create a new document
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            hash: hash.into(),
        }
    }
}
