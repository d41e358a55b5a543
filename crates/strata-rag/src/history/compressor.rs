//! Summary-based history compression

use super::{CompressedHistory, CompressionOptions, Exchange, ExchangeNode};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// User messages that carry no information worth summarizing
pub const FILLER_MESSAGES: &[&str] = &[
    "ok",
    "okay",
    "yes",
    "no",
    "y",
    "n",
    "sure",
    "thanks",
    "thank you",
    "continue",
    "go on",
    "go ahead",
    "proceed",
    "next",
    "done",
    "lgtm",
    "继续",
    "好的",
    "好",
    "是的",
    "谢谢",
    "可以",
];

const KEY_INTERACTIONS: usize = 3;
const TOP_TOOLS: usize = 5;
const MAX_FILES: usize = 5;
const INTERACTION_CHARS: usize = 200;

fn is_filler(message: &str) -> bool {
    let normalized = message
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || "。！，".contains(c))
        .to_lowercase();
    normalized.is_empty() || FILLER_MESSAGES.contains(&normalized.as_str())
}

fn tool_path(input: &str) -> Option<String> {
    let value: Value = serde_json::from_str(input).ok()?;
    value.get("path")?.as_str().map(str::to_string)
}

/// Compresses histories with fixed options
#[derive(Debug, Clone, Default)]
pub struct HistoryCompressor {
    options: CompressionOptions,
}

impl HistoryCompressor {
    pub fn new(options: CompressionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.options
    }

    pub fn compress(&self, exchanges: &[Exchange]) -> CompressedHistory {
        compress_history(exchanges, &self.options)
    }
}

/// Replace all but the most recent exchanges with one summary exchange.
///
/// Histories no longer than `max_history_length` are returned unchanged.
pub fn compress_history(exchanges: &[Exchange], options: &CompressionOptions) -> CompressedHistory {
    let original_count = exchanges.len();
    let split = original_count.saturating_sub(options.keep_recent_count);

    if original_count <= options.max_history_length || split == 0 {
        return CompressedHistory {
            exchanges: exchanges.to_vec(),
            original_count,
            compressed_count: original_count,
        };
    }

    let (old, recent) = exchanges.split_at(split);
    let mut compressed = Vec::with_capacity(recent.len() + 1);
    compressed.push(summarize(old));
    compressed.extend_from_slice(recent);

    debug!(
        original = original_count,
        compressed = compressed.len(),
        summarized = old.len(),
        "Compressed conversation history"
    );

    CompressedHistory {
        compressed_count: compressed.len(),
        original_count,
        exchanges: compressed,
    }
}

fn summarize(old: &[Exchange]) -> Exchange {
    let interactions: Vec<String> = old
        .iter()
        .filter_map(|e| e.request_message.as_deref())
        .filter(|m| !is_filler(m))
        .take(KEY_INTERACTIONS)
        .map(|m| {
            let line = m.trim().replace('\n', " ");
            if line.chars().count() > INTERACTION_CHARS {
                format!("{}...", line.chars().take(INTERACTION_CHARS).collect::<String>())
            } else {
                line
            }
        })
        .collect();

    // Tools in first-seen order so equal counts stay stable after sorting
    let mut tool_order: Vec<&str> = Vec::new();
    let mut tool_counts: HashMap<&str, usize> = HashMap::new();
    let mut files: Vec<String> = Vec::new();
    let mut more_files = 0usize;

    for (name, input) in old.iter().flat_map(Exchange::tool_uses) {
        let count = tool_counts.entry(name).or_insert(0);
        if *count == 0 {
            tool_order.push(name);
        }
        *count += 1;

        if let Some(path) = tool_path(input) {
            if files.contains(&path) {
                continue;
            }
            if files.len() < MAX_FILES {
                files.push(path);
            } else {
                more_files += 1;
            }
        }
    }

    let mut tools: Vec<(&str, usize)> = tool_order
        .into_iter()
        .map(|name| (name, tool_counts.get(name).copied().unwrap_or_default()))
        .collect();
    tools.sort_by(|a, b| b.1.cmp(&a.1));
    tools.truncate(TOP_TOOLS);

    let mut lines = vec![format!(
        "[Summary of {} earlier exchanges]",
        old.len()
    )];
    if !interactions.is_empty() {
        lines.push("Key interactions:".to_string());
        lines.extend(interactions.iter().map(|m| format!("- {m}")));
    }
    if !tools.is_empty() {
        let rendered: Vec<String> = tools
            .iter()
            .map(|(name, count)| format!("{name} ({count})"))
            .collect();
        lines.push(format!("Tools used: {}", rendered.join(", ")));
    }
    if !files.is_empty() {
        let mut line = format!("Files referenced: {}", files.join(", "));
        if more_files > 0 {
            line.push_str(&format!(" (+{more_files} more)"));
        }
        lines.push(line);
    }

    Exchange {
        exchange_id: format!("summary-{}", uuid::Uuid::new_v4()),
        request_message: None,
        response_nodes: vec![ExchangeNode::text(lines.join("\n"))],
        request_nodes: Vec::new(),
        summary: true,
    }
}

/// Rough token count of a history, at four characters per token
pub fn estimate_tokens(exchanges: &[Exchange]) -> usize {
    let chars: usize = exchanges
        .iter()
        .map(|e| {
            let request = e.request_message.as_deref().map_or(0, |m| m.chars().count());
            let nodes: usize = e
                .request_nodes
                .iter()
                .chain(e.response_nodes.iter())
                .map(|node| match node {
                    ExchangeNode::Text { text } => text.chars().count(),
                    ExchangeNode::ToolUse { name, input } => {
                        name.chars().count() + input.chars().count()
                    }
                })
                .sum();
            request + nodes
        })
        .sum();
    chars / 4
}
