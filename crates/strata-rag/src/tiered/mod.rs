//! # Tiered context
//!
//! Three resolutions per resource:
//!
//! - **L0**: one line with the file name, kind and a few class, function and
//!   export names. Cheap enough to inject for a whole directory.
//! - **L1**: a multi-line digest with full name lists, imports and an excerpt
//!   of the first lines of content.
//! - **L2**: the raw content, read by the caller on demand and never cached.
//!
//! Tiers are keyed by path and memoized by content hash. Reads are served
//! from an in-memory mirror; the durable store is a write-behind replica.

mod describer;
mod parser;
mod store;
mod types;

#[cfg(feature = "llm-descriptions")]
pub use describer::LlmContextDescriber;
pub use describer::{ContextDescriber, HeuristicDescriber};
pub use parser::{extension, file_name, is_config, RegexStructureParser, StructureParser};
pub use store::{TierLimits, TieredContextStore, L1_SEPARATOR};
pub use types::{FileStructure, ResourceKind, ResourceTier, TierStats};
