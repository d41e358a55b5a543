//! Session memory: user preferences and agent experience

use super::rules::{default_rules, PreferenceRule};
use crate::error::{StrataError, StrataResult};
use crate::storage::{Memory, MemoryQuery};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PREFERENCE_PREFIX: &str = "pref::";
const EXPERIENCE_PREFIX: &str = "exp::";

/// Confidence of a preference seen once
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// Confidence added by each further match
pub const CONFIDENCE_STEP: f64 = 0.2;

/// Preferences below this confidence are left out of prompts
pub const PROMPT_MIN_CONFIDENCE: f64 = 0.3;

const MAX_PATTERN_LEN: usize = 50;
const MAX_CONTEXT_LEN: usize = 200;
const MAX_RESOLUTION_LEN: usize = 500;
const PROMPT_PREFERENCES: usize = 10;
const PROMPT_EXPERIENCES: usize = 5;

/// Marker appended when the memory prompt is cut
pub const TRUNCATION_MARKER: &str = "\n[memory truncated]";

/// A learned user preference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    /// Category, e.g. `language`
    pub key: String,

    /// Latest observed value
    pub value: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f64,

    /// Conversation the latest evidence came from
    pub source: String,

    /// When the preference was last updated
    pub updated_at: DateTime<Utc>,
}

/// A problem-solving pattern that worked before
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// Normalized deduplication key
    pub pattern: String,

    /// Situation in which it applied
    pub context: String,

    /// What resolved it
    pub resolution: String,

    /// Times the pattern was recorded
    pub success_count: u32,

    /// When the experience was last recorded
    pub updated_at: DateTime<Utc>,
}

/// Normalize an experience pattern into an identifier-safe key
pub fn normalize_pattern(pattern: &str) -> String {
    let mut key = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
        } else if !key.is_empty() && !key.ends_with('_') {
            key.push('_');
        }
    }
    let key = key.trim_end_matches('_');
    key.chars().take(MAX_PATTERN_LEN).collect::<String>().trim_end_matches('_').to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Preference and experience memory persisted to a key-value store
pub struct SessionMemory {
    storage: Arc<dyn Memory>,
    rules: Vec<PreferenceRule>,
    preferences: RwLock<HashMap<String, Preference>>,
    experiences: RwLock<HashMap<String, Experience>>,
}

impl SessionMemory {
    /// Create a memory with the built-in rule table
    pub fn new(storage: Arc<dyn Memory>) -> Self {
        Self {
            storage,
            rules: default_rules(),
            preferences: RwLock::new(HashMap::new()),
            experiences: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the rule table
    pub fn with_rules(mut self, rules: Vec<PreferenceRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Read persisted records. Malformed entries are skipped one by one.
    pub async fn load(&self) -> usize {
        let preferences: Vec<Preference> = self.load_prefix(PREFERENCE_PREFIX).await;
        let experiences: Vec<Experience> = self.load_prefix(EXPERIENCE_PREFIX).await;
        let count = preferences.len() + experiences.len();

        self.preferences
            .write()
            .extend(preferences.into_iter().map(|p| (p.key.clone(), p)));
        self.experiences
            .write()
            .extend(experiences.into_iter().map(|e| (e.pattern.clone(), e)));

        info!(records = count, "Loaded session memory");
        count
    }

    async fn load_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Vec<T> {
        let mut stream = match self
            .storage
            .entries(&MemoryQuery::new().with_prefix(prefix))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(prefix = prefix, error = %e, "Session memory unavailable");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry.and_then(|(key, value)| {
                serde_json::from_value(value).map_err(|e| {
                    debug!(key = %key, "Skipping malformed memory entry");
                    StrataError::from(e)
                })
            }) {
                Ok(record) => records.push(record),
                Err(e) => debug!(error = %e, "Memory entry skipped"),
            }
        }
        records
    }

    async fn persist<T: Serialize>(&self, key: String, record: &T) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize memory record");
                return;
            }
        };
        if let Err(e) = self.storage.set(&key, value).await {
            if e.is_unavailable() {
                debug!(key = %key, "Session memory unavailable, keeping record in memory");
            } else {
                warn!(key = %key, error = %e, "Failed to persist memory record");
            }
        }
    }

    /// Match the rule table against a user message and record every
    /// preference found.
    ///
    /// Rules for different keys may all fire on one message, but each key is
    /// updated at most once: the first matching rule in table order wins.
    pub async fn extract_from_user_message(
        &self,
        message: &str,
        conversation_id: &str,
    ) -> Vec<Preference> {
        let mut seen = HashSet::new();
        let mut updated = Vec::new();

        for rule in &self.rules {
            if seen.contains(rule.key) {
                continue;
            }
            let Some(value) = rule.apply(message) else {
                continue;
            };
            seen.insert(rule.key);

            let preference = {
                let mut preferences = self.preferences.write();
                let confidence = match preferences.get(rule.key) {
                    Some(existing) => (existing.confidence + CONFIDENCE_STEP).min(1.0),
                    None => INITIAL_CONFIDENCE,
                };
                let preference = Preference {
                    key: rule.key.to_string(),
                    value,
                    confidence,
                    source: conversation_id.to_string(),
                    updated_at: Utc::now(),
                };
                preferences.insert(preference.key.clone(), preference.clone());
                preference
            };

            debug!(
                key = %preference.key,
                value = %preference.value,
                confidence = preference.confidence,
                "Preference extracted"
            );
            self.persist(format!("{PREFERENCE_PREFIX}{}", preference.key), &preference)
                .await;
            updated.push(preference);
        }

        updated
    }

    /// Record a successful resolution, counting repeats of the same pattern
    pub async fn record_experience(
        &self,
        pattern: &str,
        context: &str,
        resolution: &str,
    ) -> StrataResult<Experience> {
        let key = normalize_pattern(pattern);
        if key.is_empty() {
            return Err(StrataError::validation(
                "pattern",
                "must contain alphanumeric characters",
                pattern,
            ));
        }

        let experience = {
            let mut experiences = self.experiences.write();
            let success_count = experiences.get(&key).map_or(1, |e| e.success_count + 1);
            let experience = Experience {
                pattern: key.clone(),
                context: truncate(context, MAX_CONTEXT_LEN),
                resolution: truncate(resolution, MAX_RESOLUTION_LEN),
                success_count,
                updated_at: Utc::now(),
            };
            experiences.insert(key.clone(), experience.clone());
            experience
        };

        self.persist(format!("{EXPERIENCE_PREFIX}{key}"), &experience)
            .await;
        Ok(experience)
    }

    /// Preferences sorted by descending confidence
    pub fn preferences(&self) -> Vec<Preference> {
        let mut preferences: Vec<Preference> = self.preferences.read().values().cloned().collect();
        preferences.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.key.cmp(&b.key))
        });
        preferences
    }

    pub fn preference(&self, key: &str) -> Option<Preference> {
        self.preferences.read().get(key).cloned()
    }

    /// Experiences sorted by descending success count
    pub fn experiences(&self) -> Vec<Experience> {
        let mut experiences: Vec<Experience> = self.experiences.read().values().cloned().collect();
        experiences.sort_by(|a, b| {
            b.success_count
                .cmp(&a.success_count)
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        experiences
    }

    /// Render memory for prompt injection within roughly `max_tokens`.
    ///
    /// Returns an empty string when there is nothing worth injecting.
    pub fn build_memory_prompt(&self, max_tokens: usize) -> String {
        let preferences: Vec<Preference> = self
            .preferences()
            .into_iter()
            .filter(|p| p.confidence >= PROMPT_MIN_CONFIDENCE)
            .take(PROMPT_PREFERENCES)
            .collect();
        let experiences: Vec<Experience> =
            self.experiences().into_iter().take(PROMPT_EXPERIENCES).collect();

        let mut sections = Vec::new();
        if !preferences.is_empty() {
            let mut block = String::from("## User Preferences");
            for p in &preferences {
                block.push_str(&format!(
                    "\n- {}: {} (confidence {:.1})",
                    p.key, p.value, p.confidence
                ));
            }
            sections.push(block);
        }
        if !experiences.is_empty() {
            let mut block = String::from("## Past Solutions");
            for e in &experiences {
                block.push_str(&format!(
                    "\n- {} (x{}): {} -> {}",
                    e.pattern, e.success_count, e.context, e.resolution
                ));
            }
            sections.push(block);
        }

        let prompt = sections.join("\n\n");
        let budget = max_tokens.saturating_mul(4);
        if prompt.chars().count() <= budget {
            return prompt;
        }

        let mut truncated: String = prompt.chars().take(budget).collect();
        truncated.push_str(TRUNCATION_MARKER);
        truncated
    }

    /// Forget everything, in memory and in the store
    pub async fn clear(&self) -> StrataResult<()> {
        self.preferences.write().clear();
        self.experiences.write().clear();
        for prefix in [PREFERENCE_PREFIX, EXPERIENCE_PREFIX] {
            match self.storage.clear(Some(prefix)).await {
                Err(e) if !e.is_unavailable() => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    /// Release the underlying store
    pub async fn close(&self) -> StrataResult<()> {
        self.storage.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn memory() -> (Arc<InMemoryStorage>, SessionMemory) {
        let storage = Arc::new(InMemoryStorage::new());
        (storage.clone(), SessionMemory::new(storage))
    }

    #[tokio::test]
    async fn test_single_match_starts_at_half() {
        let (storage, memory) = memory();
        let found = memory
            .extract_from_user_message("I prefer Rust", "conv-1")
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, INITIAL_CONFIDENCE);
        assert_eq!(found[0].source, "conv-1");
        assert!(storage.get("pref::language").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_confidence_is_capped() {
        let (_, memory) = memory();
        for _ in 0..10 {
            memory.extract_from_user_message("I prefer Rust", "c").await;
        }
        let language = memory.preference("language").unwrap();
        assert_eq!(language.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_latest_value_wins_and_confidence_grows() {
        let (_, memory) = memory();
        memory.extract_from_user_message("I prefer Rust", "c1").await;
        memory.extract_from_user_message("I prefer Python", "c2").await;

        let language = memory.preference("language").unwrap();
        assert_eq!(language.value, "python");
        assert!((language.confidence - 0.7).abs() < 1e-9);
        assert_eq!(language.source, "c2");
    }

    #[tokio::test]
    async fn test_one_update_per_key_per_message() {
        let (_, memory) = memory();
        // Both language rules match this message
        memory
            .extract_from_user_message("I use Rust, 我喜欢Rust", "c")
            .await;
        assert_eq!(memory.preference("language").unwrap().confidence, INITIAL_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_record_experience_counts_and_truncates() {
        let (_, memory) = memory();
        let long = "x".repeat(1000);

        let first = memory
            .record_experience("Borrow checker: E0502!", &long, &long)
            .await
            .unwrap();
        assert_eq!(first.pattern, "borrow_checker_e0502");
        assert_eq!(first.context.len(), 200);
        assert_eq!(first.resolution.len(), 500);

        let second = memory
            .record_experience("borrow checker e0502", "ctx", "clone it")
            .await
            .unwrap();
        assert_eq!(second.success_count, 2);

        assert!(memory.record_experience("!!!", "c", "r").await.is_err());
    }

    #[test]
    fn test_normalize_pattern_bounds_length() {
        let key = normalize_pattern(&"ab ".repeat(40));
        assert!(key.chars().count() <= 50);
        assert!(!key.ends_with('_'));
    }

    #[tokio::test]
    async fn test_memory_prompt_ranks_and_filters() {
        let (_, memory) = memory();
        memory.extract_from_user_message("I prefer Rust", "c").await;
        memory.extract_from_user_message("I prefer Rust", "c").await;
        memory.extract_from_user_message("using react", "c").await;
        memory.record_experience("flaky test", "timeouts", "raise limit").await.unwrap();

        let prompt = memory.build_memory_prompt(500);
        assert!(prompt.starts_with("## User Preferences\n- language: rust (confidence 0.7)"));
        assert!(prompt.contains("- framework: react (confidence 0.5)"));
        assert!(prompt.contains("## Past Solutions\n- flaky_test (x1): timeouts -> raise limit"));
    }

    #[tokio::test]
    async fn test_memory_prompt_truncates() {
        let (_, memory) = memory();
        memory.record_experience("p", &"c".repeat(200), &"r".repeat(500)).await.unwrap();

        let prompt = memory.build_memory_prompt(10);
        assert!(prompt.ends_with(TRUNCATION_MARKER));
        assert_eq!(prompt.chars().count(), 40 + TRUNCATION_MARKER.chars().count());
        assert!(memory.build_memory_prompt(1000).len() < 1000 * 4);
    }

    #[tokio::test]
    async fn test_empty_memory_renders_nothing() {
        let (_, memory) = memory();
        assert!(memory.build_memory_prompt(100).is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_malformed_entries() {
        let (storage, memory) = memory();
        memory.extract_from_user_message("I prefer Go", "c").await;
        memory.record_experience("retry", "c", "r").await.unwrap();
        storage.set("pref::broken", json!({"key": 1})).await.unwrap();
        storage.set("exp::broken", json!("nope")).await.unwrap();

        let reloaded = SessionMemory::new(storage);
        assert_eq!(reloaded.load().await, 2);
        assert_eq!(reloaded.preference("language").unwrap().value, "go");
        assert_eq!(reloaded.experiences()[0].pattern, "retry");
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_records() {
        let (storage, memory) = memory();
        memory.extract_from_user_message("I prefer Go", "c").await;
        memory.clear().await.unwrap();

        assert!(memory.preferences().is_empty());
        assert_eq!(storage.count(None).await.unwrap(), 0);
    }
}
