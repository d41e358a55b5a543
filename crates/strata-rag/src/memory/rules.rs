//! Preference extraction rules

use regex::{Captures, Regex};
use tracing::error;

/// Derives a preference value from a match
pub type Extractor = fn(&Captures<'_>) -> Option<String>;

/// One entry of the rule table
#[derive(Debug, Clone)]
pub struct PreferenceRule {
    /// Preference key set when the rule fires
    pub key: &'static str,
    pattern: Regex,
    extract: Extractor,
}

impl PreferenceRule {
    /// Compile a rule. Returns `None` for an invalid pattern.
    pub fn new(key: &'static str, pattern: &str, extract: Extractor) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self {
                key,
                pattern,
                extract,
            }),
            Err(e) => {
                error!(key = key, error = %e, "Invalid preference pattern");
                None
            }
        }
    }

    /// Apply the rule to a message
    pub fn apply(&self, message: &str) -> Option<String> {
        self.pattern
            .captures(message)
            .and_then(|caps| (self.extract)(&caps))
            .filter(|value| !value.is_empty())
    }
}

fn lowercase(caps: &Captures<'_>) -> Option<String> {
    caps.get(1).map(|m| m.as_str().trim().to_lowercase())
}

fn language(caps: &Captures<'_>) -> Option<String> {
    lowercase(caps).map(|lang| match lang.as_str() {
        "golang" => "go".to_string(),
        "ts" => "typescript".to_string(),
        "js" => "javascript".to_string(),
        _ => lang,
    })
}

fn style(caps: &Captures<'_>) -> Option<String> {
    lowercase(caps).map(|s| match s.as_str() {
        "oop" | "object oriented" | "object-oriented" => "object-oriented".to_string(),
        "函数式" => "functional".to_string(),
        "面向对象" => "object-oriented".to_string(),
        _ => s,
    })
}

fn indentation(caps: &Captures<'_>) -> Option<String> {
    let raw = lowercase(caps)?;
    if raw.starts_with("tab") || raw == "制表符" {
        return Some("tabs".to_string());
    }
    let width: String = raw.chars().filter(char::is_ascii_digit).collect();
    (!width.is_empty()).then(|| format!("{width} spaces"))
}

fn naming(caps: &Captures<'_>) -> Option<String> {
    lowercase(caps).map(|n| n.replace([' ', '-', '_'], ""))
}

const LANGUAGES: &str =
    r"rust|python|typescript|javascript|golang|go|java|kotlin|swift|c\+\+|c#|ruby|php|scala|elixir|dart|ts|js";
const FRAMEWORKS: &str = r"react|vue|angular|svelte|next\.?js|nuxt|django|flask|fastapi|express|nestjs|spring|rails|laravel|axum|actix|rocket|tauri|electron|flutter";
const TEST_FRAMEWORKS: &str = r"jest|vitest|mocha|pytest|unittest|junit|rspec|playwright|cypress";
const PACKAGE_MANAGERS: &str = r"npm|yarn|pnpm|bun|pip|poetry|uv|cargo|maven|gradle";

/// The built-in rule table, evaluated in order
pub fn default_rules() -> Vec<PreferenceRule> {
    let table: Vec<(&'static str, String, Extractor)> = vec![
        (
            "language",
            format!(r"(?i)\b(?:i\s+(?:prefer|use|like|love|write|code in|work in|am using|mostly use)|prefer|written in|code in)\s+({LANGUAGES})(?:[^\w+#]|$)"),
            language,
        ),
        (
            "language",
            format!(r"(?i)(?:我(?:喜欢|偏好|习惯|常用|主要用|使用|用)|请用|使用)\s*({LANGUAGES})"),
            language,
        ),
        (
            "framework",
            format!(r"(?i)\b(?:using|use|prefer|with|built on|based on)\s+({FRAMEWORKS})\b"),
            lowercase,
        ),
        (
            "framework",
            format!(r"(?i)(?:使用|用|基于|框架是)\s*({FRAMEWORKS})"),
            lowercase,
        ),
        (
            "style",
            r"(?i)\b(?:prefer|like|use|write in)\s+(?:a\s+)?(functional|object[- ]oriented|oop|procedural|declarative)\b".to_string(),
            style,
        ),
        (
            "style",
            r"(?:喜欢|偏好|使用)\s*(函数式|面向对象)".to_string(),
            style,
        ),
        (
            "test_framework",
            format!(r"(?i)\b(?:test(?:s|ing)?\s+(?:with|using|in)|use|prefer|run)\s+({TEST_FRAMEWORKS})\b"),
            lowercase,
        ),
        (
            "test_framework",
            format!(r"(?i)(?:测试(?:用|使用)?)\s*({TEST_FRAMEWORKS})"),
            lowercase,
        ),
        (
            "package_manager",
            format!(r"(?i)\b(?:use|using|prefer|install with|via)\s+({PACKAGE_MANAGERS})\b"),
            lowercase,
        ),
        (
            "response_language",
            r"(?i)\b(?:respond|reply|answer|talk|speak|write)\s+(?:to me\s+)?in\s+(english|chinese|japanese|korean|french|german|spanish)\b".to_string(),
            lowercase,
        ),
        (
            "response_language",
            r"(?:用中文|说中文|中文回答|中文回复)".to_string(),
            |_| Some("chinese".to_string()),
        ),
        (
            "response_language",
            r"(?:用英文|英文回答|英文回复|说英文)".to_string(),
            |_| Some("english".to_string()),
        ),
        (
            "indentation",
            r"(?i)\b(?:use|prefer|indent with|indentation of)\s+(tabs?|\d+\s*spaces?)\b".to_string(),
            indentation,
        ),
        (
            "indentation",
            r"(\d+\s*个?空格|制表符)缩进".to_string(),
            indentation,
        ),
        (
            "naming",
            r"(?i)\b(camel\s?case|snake[_ ]case|pascal\s?case|kebab[- ]case)\b".to_string(),
            naming,
        ),
    ];

    table
        .into_iter()
        .filter_map(|(key, pattern, extract)| PreferenceRule::new(key, &pattern, extract))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(message: &str) -> Vec<(&'static str, String)> {
        default_rules()
            .iter()
            .filter_map(|rule| rule.apply(message).map(|value| (rule.key, value)))
            .collect()
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(default_rules().len(), 15);
    }

    #[test]
    fn test_english_phrasings() {
        let found = extract("I prefer Rust and we're using Axum, tests with pytest please");
        assert!(found.contains(&("language", "rust".to_string())));
        assert!(found.contains(&("framework", "axum".to_string())));
        assert!(found.contains(&("test_framework", "pytest".to_string())));
    }

    #[test]
    fn test_chinese_phrasings() {
        let found = extract("我喜欢TypeScript，请用中文回答，4个空格缩进");
        assert!(found.contains(&("language", "typescript".to_string())));
        assert!(found.contains(&("response_language", "chinese".to_string())));
        assert!(found.contains(&("indentation", "4 spaces".to_string())));
    }

    #[test]
    fn test_normalized_values() {
        let found = extract("Please use tabs, I like OOP and snake_case names, I use golang");
        assert!(found.contains(&("indentation", "tabs".to_string())));
        assert!(found.contains(&("style", "object-oriented".to_string())));
        assert!(found.contains(&("naming", "snakecase".to_string())));
        assert!(found.contains(&("language", "go".to_string())));
    }

    #[test]
    fn test_languages_ending_in_symbols() {
        assert!(extract("I prefer C++ for this").contains(&("language", "c++".to_string())));
        assert!(extract("I use C# daily").contains(&("language", "c#".to_string())));
        assert!(extract("written in c++").contains(&("language", "c++".to_string())));
        assert!(extract("I prefer rustacean jokes").is_empty());
    }

    #[test]
    fn test_no_match_is_no_extraction() {
        assert!(extract("What does this function return?").is_empty());
    }
}
