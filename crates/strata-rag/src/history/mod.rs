//! # History compression
//!
//! Bounds conversation history by folding older exchanges into one
//! synthetic summary exchange while keeping the most recent ones verbatim.

mod compressor;

pub use compressor::{compress_history, estimate_tokens, HistoryCompressor, FILLER_MESSAGES};

use serde::{Deserialize, Serialize};

/// One content node of a request or response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeNode {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        /// JSON-encoded tool arguments
        input: String,
    },
}

impl ExchangeNode {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self::ToolUse {
            name: name.into(),
            input: input.into(),
        }
    }
}

/// A request/response pair of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub exchange_id: String,

    /// The user's message, if the exchange started with one
    #[serde(default)]
    pub request_message: Option<String>,

    #[serde(default)]
    pub response_nodes: Vec<ExchangeNode>,

    #[serde(default)]
    pub request_nodes: Vec<ExchangeNode>,

    /// Set on synthetic summaries produced by compression
    #[serde(default)]
    pub summary: bool,
}

impl Exchange {
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            request_message: None,
            response_nodes: Vec::new(),
            request_nodes: Vec::new(),
            summary: false,
        }
    }

    pub fn with_request(mut self, message: impl Into<String>) -> Self {
        self.request_message = Some(message.into());
        self
    }

    pub fn with_response_node(mut self, node: ExchangeNode) -> Self {
        self.response_nodes.push(node);
        self
    }

    pub fn with_request_node(mut self, node: ExchangeNode) -> Self {
        self.request_nodes.push(node);
        self
    }

    /// Tool invocations in request and response nodes
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str)> {
        self.request_nodes
            .iter()
            .chain(self.response_nodes.iter())
            .filter_map(|node| match node {
                ExchangeNode::ToolUse { name, input } => Some((name.as_str(), input.as_str())),
                ExchangeNode::Text { .. } => None,
            })
    }
}

/// Compression thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionOptions {
    /// Exchanges kept verbatim at the end of the history
    pub keep_recent_count: usize,

    /// Histories up to this length pass through unchanged
    pub max_history_length: usize,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            keep_recent_count: 3,
            max_history_length: 8,
        }
    }
}

/// Output of a compression pass
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedHistory {
    pub exchanges: Vec<Exchange>,
    pub original_count: usize,
    pub compressed_count: usize,
}

impl CompressedHistory {
    /// Whether a summary replaced older exchanges
    pub fn was_compressed(&self) -> bool {
        self.compressed_count < self.original_count
    }
}
