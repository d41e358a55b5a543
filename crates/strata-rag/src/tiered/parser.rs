//! Pattern-based structure extraction

use super::types::{FileStructure, ResourceKind};
use regex::Regex;
use tracing::error;

/// Extracts named items from source text
pub trait StructureParser: Send + Sync {
    /// Parse `content`; the language is chosen from the extension of `path`
    fn parse(&self, content: &str, path: &str) -> FileStructure;
}

/// Extract the extension of a path, lowercased, without the dot
pub fn extension(path: &str) -> String {
    let name = file_name(path);
    // Dotfiles such as `.env` yield their name as the extension
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Final path segment
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "jsonc", "yaml", "yml", "toml", "ini", "cfg", "conf", "env", "xml", "lock",
];

/// Whether the path looks like a configuration file
pub fn is_config(path: &str) -> bool {
    CONFIG_EXTENSIONS.contains(&extension(path).as_str())
}

#[derive(Debug, Default)]
struct LanguageRules {
    extensions: &'static [&'static str],
    functions: Vec<Regex>,
    classes: Vec<Regex>,
    imports: Vec<Regex>,
    exports: Vec<Regex>,
    script: bool,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                error!(pattern = pattern, error = %e, "Invalid structure pattern");
                None
            }
        })
        .collect()
}

fn collect(content: &str, patterns: &[Regex], out: &mut Vec<String>) {
    for re in patterns {
        for caps in re.captures_iter(content) {
            if let Some(name) = caps.iter().skip(1).flatten().next() {
                let name = name.as_str().trim();
                if !name.is_empty() && !out.iter().any(|n| n == name) {
                    out.push(name.to_string());
                }
            }
        }
    }
}

/// Default parser covering common languages with regular expressions
#[derive(Debug)]
pub struct RegexStructureParser {
    languages: Vec<LanguageRules>,
    config: LanguageRules,
}

impl Default for RegexStructureParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexStructureParser {
    pub fn new() -> Self {
        let languages = vec![
            LanguageRules {
                extensions: &["js", "jsx", "ts", "tsx", "mjs", "cjs"],
                functions: compile(&[
                    r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
                    r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>",
                ]),
                classes: compile(&[
                    r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(\w+)",
                    r"(?m)^\s*(?:export\s+)?interface\s+(\w+)",
                ]),
                imports: compile(&[
                    r#"(?m)^\s*import\s+[^'"]*?from\s+['"]([^'"]+)['"]"#,
                    r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#,
                    r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
                ]),
                exports: compile(&[
                    r"(?m)^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function\s*\*?|class|const|let|var|interface|type|enum)\s+(\w+)",
                    r"(?m)^\s*export\s+default\s+(\w+)\s*;?\s*$",
                ]),
                script: false,
            },
            LanguageRules {
                extensions: &["py", "pyw"],
                functions: compile(&[r"(?m)^\s*(?:async\s+)?def\s+(\w+)"]),
                classes: compile(&[r"(?m)^\s*class\s+(\w+)"]),
                imports: compile(&[
                    r"(?m)^\s*from\s+([\w.]+)\s+import",
                    r"(?m)^\s*import\s+([\w.]+)",
                ]),
                exports: compile(&[r#"(?m)^__all__\s*=\s*\[\s*['"](\w+)['"]"#]),
                script: true,
            },
            LanguageRules {
                extensions: &["rs"],
                functions: compile(&[
                    r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?fn\s+(\w+)",
                ]),
                classes: compile(&[
                    r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(\w+)",
                ]),
                imports: compile(&[r"(?m)^\s*(?:pub\s+)?use\s+([\w:]+)"]),
                exports: compile(&[
                    r"(?m)^\s*pub\s+(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|mod|type|static|const)\s+(\w+)",
                ]),
                script: false,
            },
            LanguageRules {
                extensions: &["go"],
                functions: compile(&[r"(?m)^func\s+(?:\([^)]*\)\s*)?(\w+)"]),
                classes: compile(&[r"(?m)^type\s+(\w+)\s+(?:struct|interface)"]),
                imports: compile(&[
                    r#"(?m)^import\s+(?:\w+\s+)?"([^"]+)""#,
                    r#"(?m)^\s+(?:\w+\s+)?"([^"]+)"\s*$"#,
                ]),
                exports: compile(&[r"(?m)^(?:func\s+(?:\([^)]*\)\s*)?|type\s+)([A-Z]\w*)"]),
                script: false,
            },
            LanguageRules {
                extensions: &["java", "kt", "kts", "scala"],
                functions: compile(&[
                    r"(?m)^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|override|suspend)\s+)*fun\s+(?:<[^>]+>\s*)?(\w+)",
                    r"(?m)^\s*(?:(?:public|private|protected|static|final|abstract|synchronized)\s+)+[\w<>\[\],.? ]+\s+(\w+)\s*\(",
                ]),
                classes: compile(&[
                    r"(?m)^\s*(?:(?:public|private|protected|static|final|abstract|data|sealed|open)\s+)*(?:class|interface|enum|object|record)\s+(\w+)",
                ]),
                imports: compile(&[r"(?m)^\s*import\s+(?:static\s+)?([\w.*]+)"]),
                exports: compile(&[r"(?m)^\s*public\s+(?:(?:static|final|abstract)\s+)*(?:class|interface|enum|record)\s+(\w+)"]),
                script: false,
            },
            LanguageRules {
                extensions: &["c", "h", "cc", "cpp", "cxx", "hpp", "hh"],
                functions: compile(&[
                    r"(?m)^[A-Za-z_][\w\s\*:<>,]*?[\s\*]+\**([A-Za-z_]\w*)\s*\([^;{]*\)\s*(?:const\s*)?\{",
                ]),
                classes: compile(&[r"(?m)^\s*(?:typedef\s+)?(?:class|struct)\s+(\w+)"]),
                imports: compile(&[r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#]),
                exports: Vec::new(),
                script: false,
            },
            LanguageRules {
                extensions: &["sh", "bash", "zsh"],
                functions: compile(&[r"(?m)^\s*(?:function\s+)?(\w+)\s*\(\)\s*\{"]),
                classes: Vec::new(),
                imports: compile(&[r"(?m)^\s*(?:source|\.)\s+(\S+)"]),
                exports: compile(&[r"(?m)^\s*export\s+(\w+)="]),
                script: true,
            },
        ];

        let config = LanguageRules {
            extensions: CONFIG_EXTENSIONS,
            // Top-level sections and keys
            exports: compile(&[
                r"(?m)^\[([\w.\-]+)\]",
                r"(?m)^([A-Za-z_][\w\-]*)\s*:",
                r#"(?m)^\s{2}"([\w\-]+)"\s*:"#,
            ]),
            ..Default::default()
        };

        Self { languages, config }
    }

    fn infer_kind(rules: &LanguageRules, structure: &FileStructure) -> ResourceKind {
        if !structure.classes.is_empty() && structure.classes.len() >= structure.functions.len() {
            ResourceKind::Class
        } else if !structure.imports.is_empty() || !structure.exports.is_empty() {
            ResourceKind::Module
        } else if rules.script || !structure.functions.is_empty() {
            ResourceKind::Script
        } else {
            ResourceKind::Unknown
        }
    }
}

impl StructureParser for RegexStructureParser {
    fn parse(&self, content: &str, path: &str) -> FileStructure {
        let ext = extension(path);

        if self.config.extensions.contains(&ext.as_str()) {
            let mut structure = FileStructure {
                kind: ResourceKind::Config,
                ..Default::default()
            };
            collect(content, &self.config.exports, &mut structure.exports);
            return structure;
        }

        let Some(rules) = self
            .languages
            .iter()
            .find(|rules| rules.extensions.contains(&ext.as_str()))
        else {
            return FileStructure::default();
        };

        let mut structure = FileStructure::default();
        collect(content, &rules.functions, &mut structure.functions);
        collect(content, &rules.classes, &mut structure.classes);
        collect(content, &rules.imports, &mut structure.imports);
        collect(content, &rules.exports, &mut structure.exports);
        structure.kind = Self::infer_kind(rules, &structure);
        structure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typescript_structure() {
        let source = r#"
import { Store } from "./store";
import fs from 'fs';
const helper = (x) => x + 1;
export async function generateTier(path) {}
export class TieredContext {}
function generateTier(p) {}
"#;
        let s = RegexStructureParser::new().parse(source, "src/rag/tiered.ts");
        assert_eq!(s.imports, vec!["./store", "fs"]);
        assert_eq!(s.functions, vec!["generateTier", "helper"]);
        assert_eq!(s.classes, vec!["TieredContext"]);
        assert_eq!(s.exports, vec!["generateTier", "TieredContext"]);
        assert_eq!(s.kind, ResourceKind::Module);
    }

    #[test]
    fn test_rust_structure() {
        let source = "use std::sync::Arc;\n\npub struct Store;\n\nimpl Store {\n    pub async fn open() {}\n    fn helper() {}\n}\n";
        let s = RegexStructureParser::new().parse(source, "src/store.rs");
        assert_eq!(s.imports, vec!["std::sync::Arc"]);
        assert_eq!(s.classes, vec!["Store"]);
        assert_eq!(s.functions, vec!["open", "helper"]);
        assert_eq!(s.exports, vec!["Store", "open"]);
    }

    #[test]
    fn test_python_class_kind() {
        let source = "class Parser:\n    def parse(self):\n        pass\n";
        let s = RegexStructureParser::new().parse(source, "parser.py");
        assert_eq!(s.kind, ResourceKind::Class);
        assert_eq!(s.functions, vec!["parse"]);
    }

    #[test]
    fn test_config_and_unknown() {
        let parser = RegexStructureParser::new();
        let s = parser.parse("[package]\nname = \"x\"\n[dependencies]\n", "Cargo.toml");
        assert_eq!(s.kind, ResourceKind::Config);
        assert_eq!(s.exports, vec!["package", "dependencies"]);

        assert_eq!(parser.parse("whatever", "notes.txt"), FileStructure::default());
        assert!(is_config(".env"));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(file_name("src/rag/store.ts"), "store.ts");
        assert_eq!(file_name("C:\\code\\main.rs"), "main.rs");
        assert_eq!(extension("archive.TAR.GZ"), "gz");
        assert_eq!(extension("Makefile"), "");
    }
}
