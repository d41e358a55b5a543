//! One-line natural-language descriptions for the L1 tier

use super::parser::{extension, file_name};
use super::types::{FileStructure, ResourceKind};

/// Produces the optional summary line of an L1 digest
#[async_trait::async_trait]
pub trait ContextDescriber: Send + Sync {
    /// Describe a file in one sentence. `None` omits the line.
    async fn describe(&self, path: &str, content: &str, structure: &FileStructure)
        -> Option<String>;
}

/// Local digest sentence built from the parsed structure
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDescriber;

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

impl HeuristicDescriber {
    pub fn digest(path: &str, content: &str, structure: &FileStructure) -> String {
        let name = file_name(path);
        let lines = content.lines().count();

        if structure.kind == ResourceKind::Config {
            return format!(
                "Configuration file {name} ({}) with {}.",
                plural(lines, "line"),
                plural(structure.exports.len(), "top-level section")
            );
        }

        let mut parts = Vec::new();
        if !structure.classes.is_empty() {
            parts.push(plural(structure.classes.len(), "type"));
        }
        if !structure.functions.is_empty() {
            parts.push(plural(structure.functions.len(), "function"));
        }

        let ext = extension(path);
        let subject = if ext.is_empty() {
            structure.kind.to_string()
        } else {
            format!(".{ext} {}", structure.kind)
        };
        let mut sentence = if parts.is_empty() {
            format!("{subject} {name}")
        } else {
            format!("{subject} {name} defining {}", parts.join(" and "))
        };
        if !structure.imports.is_empty() {
            sentence.push_str(&format!(
                ", importing {}",
                plural(structure.imports.len(), "module")
            ));
        }
        sentence.push_str(&format!(" ({}).", plural(lines, "line")));

        let mut chars = sentence.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => sentence,
        }
    }
}

#[async_trait::async_trait]
impl ContextDescriber for HeuristicDescriber {
    async fn describe(
        &self,
        path: &str,
        content: &str,
        structure: &FileStructure,
    ) -> Option<String> {
        Some(Self::digest(path, content, structure))
    }
}

/// Asks a chat-completion model for the description, falling back to
/// [`HeuristicDescriber`] on any failure
#[cfg(feature = "llm-descriptions")]
pub struct LlmContextDescriber {
    client: strata_llm::Client,
    max_excerpt_chars: usize,
}

#[cfg(feature = "llm-descriptions")]
impl LlmContextDescriber {
    pub fn new(client: strata_llm::Client) -> Self {
        Self {
            client,
            max_excerpt_chars: 3000,
        }
    }

    pub fn with_max_excerpt_chars(mut self, max_excerpt_chars: usize) -> Self {
        self.max_excerpt_chars = max_excerpt_chars;
        self
    }

    fn prompt(&self, path: &str, content: &str, structure: &FileStructure) -> String {
        let excerpt = crate::embedding::truncate_chars(content, self.max_excerpt_chars);
        format!(
            "Describe the purpose of this file in one short sentence. Reply with the sentence only.\n\
             Path: {path}\n\
             Kind: {}\n\
             Classes: {}\n\
             Functions: {}\n\
             ```\n{excerpt}\n```",
            structure.kind,
            structure.classes.join(", "),
            structure.functions.join(", "),
        )
    }
}

#[cfg(feature = "llm-descriptions")]
#[async_trait::async_trait]
impl ContextDescriber for LlmContextDescriber {
    async fn describe(
        &self,
        path: &str,
        content: &str,
        structure: &FileStructure,
    ) -> Option<String> {
        let messages = vec![strata_llm::ChatMessage::user(self.prompt(path, content, structure))];

        match self.client.chat_completion(messages).await {
            Ok(response) => {
                let line = response.content.lines().map(str::trim).find(|l| !l.is_empty());
                match line {
                    Some(line) => Some(line.to_string()),
                    None => Some(HeuristicDescriber::digest(path, content, structure)),
                }
            }
            Err(e) => {
                let err = crate::error::StrataError::llm("describe", e);
                tracing::warn!(path = path, error = %err, "Description generation failed, using heuristic digest");
                Some(HeuristicDescriber::digest(path, content, structure))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> FileStructure {
        FileStructure {
            functions: vec!["open".into(), "close".into()],
            classes: vec!["Store".into()],
            imports: vec!["std::sync::Arc".into()],
            exports: vec![],
            kind: ResourceKind::Module,
        }
    }

    #[test]
    fn test_heuristic_digest() {
        let digest = HeuristicDescriber::digest("src/store.rs", "a\nb\nc", &structure());
        assert_eq!(
            digest,
            ".rs module store.rs defining 1 type and 2 functions, importing 1 module (3 lines)."
        );

        let config = FileStructure {
            exports: vec!["package".into()],
            kind: ResourceKind::Config,
            ..Default::default()
        };
        assert_eq!(
            HeuristicDescriber::digest("Cargo.toml", "[package]", &config),
            "Configuration file Cargo.toml (1 line) with 1 top-level section."
        );
    }

    #[cfg(feature = "llm-descriptions")]
    #[tokio::test]
    async fn test_llm_describer_falls_back_on_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = strata_llm::Client::new(strata_llm::ClientConfig::new(
            format!("{}/v1", server.uri()),
            "key",
            "mini",
        ))
        .unwrap();
        let describer = LlmContextDescriber::new(client);

        let line = describer
            .describe("src/store.rs", "a\nb\nc", &structure())
            .await
            .unwrap();
        assert!(line.starts_with(".rs module store.rs"));
    }

    #[cfg(feature = "llm-descriptions")]
    #[tokio::test]
    async fn test_llm_describer_uses_first_line() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "\nDurable KV store wrapper.\nMore."}}]
            })))
            .mount(&server)
            .await;

        let client = strata_llm::Client::new(strata_llm::ClientConfig::new(
            format!("{}/v1", server.uri()),
            "key",
            "mini",
        ))
        .unwrap();
        let line = LlmContextDescriber::new(client)
            .describe("src/store.rs", "", &structure())
            .await;
        assert_eq!(line.as_deref(), Some("Durable KV store wrapper."));
    }
}
