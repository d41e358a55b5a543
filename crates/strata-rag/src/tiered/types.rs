//! Tier records and parsed file structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Module,
    Class,
    Script,
    Config,
    #[default]
    Unknown,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Script => "script",
            Self::Config => "config",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names extracted from a file. Every list is ordered and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStructure {
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub kind: ResourceKind,
}

/// Cached L0/L1 digests for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTier {
    /// Resource path, unique
    pub path: String,

    /// Content fingerprint the tier was built from
    pub hash: String,

    /// Single-line digest
    pub l0: String,

    /// Detailed digest with a bounded excerpt
    pub l1: String,

    /// Parsed structure
    pub structure: FileStructure,

    /// When the tier was generated
    pub updated_at: DateTime<Utc>,
}

/// Size of the tier cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    /// Number of cached resources
    pub resources: usize,

    /// Approximate L0 tokens across all resources
    pub l0_tokens: usize,

    /// Approximate L1 tokens across all resources
    pub l1_tokens: usize,
}
