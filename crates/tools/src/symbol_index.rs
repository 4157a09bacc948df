//! Lightweight symbol index: definition and usage sites per file.
//!
//! Extraction is line-oriented and regex-based, covering Rust, Python,
//! JavaScript/TypeScript and Go. Each summary is memoized in the CAS,
//! keyed by the file's bytes plus [`PARSER_VERSION`], so an unchanged file
//! is never re-scanned and a parser change invalidates every summary.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use veritas_cas::{CasMetadata, ContentStore};

/// Version tag of the extraction rules below.
pub const PARSER_VERSION: &str = "sym-regex-v1";

/// Usage sites kept per symbol per file.
const MAX_USES_PER_SYMBOL: usize = 64;

/// Source languages the index understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    Go,
}

impl Language {
    /// Detect the language from a file extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => Some(Self::JavaScript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    fn definition_patterns(self) -> &'static [Regex] {
        match self {
            Self::Rust => &RUST_DEFS,
            Self::Python => &PYTHON_DEFS,
            Self::JavaScript => &JS_DEFS,
            Self::Go => &GO_DEFS,
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

static RUST_DEFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:default\s+)?(?:async\s+)?(?:const\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?(?:fn|struct|enum|trait|type|mod|union)\s+([A-Za-z_][A-Za-z0-9_]*)",
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*:",
        r"^\s*macro_rules!\s*([A-Za-z_][A-Za-z0-9_]*)",
    ])
});

static PYTHON_DEFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"^\s*(?:async\s+)?(?:def|class)\s+([A-Za-z_][A-Za-z0-9_]*)"])
});

static JS_DEFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|interface|type|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=",
    ])
});

static GO_DEFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)",
        r"^\s*type\s+([A-Za-z_][A-Za-z0-9_]*)",
    ])
});

/// Words never recorded as usages.
const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "case", "class", "const", "continue", "crate", "def", "default",
    "elif", "else", "enum", "export", "false", "fn", "for", "from", "func", "function", "go", "if",
    "impl", "import", "in", "interface", "is", "let", "loop", "match", "mod", "mut", "new", "none",
    "not", "null", "or", "and", "package", "pass", "pub", "return", "self", "static", "struct",
    "super", "switch", "this", "trait", "true", "type", "use", "var", "where", "while", "with",
    "yield",
];

/// Definition and usage line numbers (1-based) per lowercased symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSymbols {
    pub defs: BTreeMap<String, Vec<usize>>,
    pub uses: BTreeMap<String, Vec<usize>>,
}

impl FileSymbols {
    /// Scan `text` with the rules for `language`.
    pub fn extract(text: &str, language: Language) -> Self {
        let mut symbols = Self::default();
        let patterns = language.definition_patterns();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let defined: Option<String> = patterns
                .iter()
                .find_map(|re| re.captures(line))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_ascii_lowercase());

            if let Some(name) = &defined {
                symbols.defs.entry(name.clone()).or_default().push(line_no);
            }

            let code = strip_line_comment(line, language);
            for ident in identifiers(code) {
                let key = ident.to_ascii_lowercase();
                if defined.as_deref() == Some(key.as_str()) || KEYWORDS.contains(&key.as_str()) {
                    continue;
                }
                let sites = symbols.uses.entry(key).or_default();
                if sites.len() < MAX_USES_PER_SYMBOL && sites.last() != Some(&line_no) {
                    sites.push(line_no);
                }
            }
        }
        symbols
    }

    pub fn definitions(&self, name: &str) -> &[usize] {
        self.defs.get(&name.to_ascii_lowercase()).map_or(&[], Vec::as_slice)
    }

    pub fn usages(&self, name: &str) -> &[usize] {
        self.uses.get(&name.to_ascii_lowercase()).map_or(&[], Vec::as_slice)
    }
}

fn strip_line_comment(line: &str, language: Language) -> &str {
    let marker = match language {
        Language::Python => "#",
        _ => "//",
    };
    line.split_once(marker).map_or(line, |(code, _)| code)
}

/// Identifier tokens of length ≥ 2 that do not start with a digit.
fn identifiers(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .filter(|t| t.len() >= 2 && !t.starts_with(|c: char| c.is_ascii_digit()))
}

/// Per-file symbol summaries backed by a content store.
pub struct SymbolIndex {
    store: Arc<dyn ContentStore>,
}

impl SymbolIndex {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Summary for one file's bytes, or `None` if the language is unsupported.
    ///
    /// Store failures are logged and the summary is computed in-process.
    pub async fn summarize(&self, path: &str, bytes: &[u8]) -> Option<FileSymbols> {
        let language = Language::from_path(path)?;

        match self.store.lookup(bytes, PARSER_VERSION).await {
            Ok(Some(entry)) => match serde_json::from_slice::<FileSymbols>(&entry.blob) {
                Ok(symbols) => {
                    debug!(path, "Symbol summary served from CAS");
                    return Some(symbols);
                }
                Err(e) => warn!(path, error = %e, "Cached symbol summary unreadable, re-scanning"),
            },
            Ok(None) => {}
            Err(e) => warn!(path, error = %e, "CAS lookup failed"),
        }

        let text = String::from_utf8_lossy(bytes);
        let symbols = FileSymbols::extract(&text, language);

        match serde_json::to_vec(&symbols) {
            Ok(json) => {
                let metadata = CasMetadata::new("application/json").with_source(path);
                if let Err(e) = self.store.memoize(bytes, PARSER_VERSION, &json, metadata).await {
                    warn!(path, error = %e, "Failed to memoize symbol summary");
                }
            }
            Err(e) => warn!(path, error = %e, "Failed to encode symbol summary"),
        }
        Some(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_cas::MemoryStore;

    const RUST_SRC: &str = "\
pub struct DelegationPolicy {
    budget: u32,
}

impl DelegationPolicy {
    pub async fn check(&self) -> bool { true }
}

fn main() {
    let policy = DelegationPolicy { budget: 1 }; // DelegationPolicy in comment
}
";

    #[test]
    fn language_detection() {
        assert_eq!(Language::from_path("src/lib.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("a/b.tsx"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("main.go"), Some(Language::Go));
        assert_eq!(Language::from_path("x.PY"), Some(Language::Python));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn rust_definitions_and_usages() {
        let symbols = FileSymbols::extract(RUST_SRC, Language::Rust);
        assert_eq!(symbols.definitions("DelegationPolicy"), &[1]);
        assert_eq!(symbols.definitions("check"), &[6]);
        assert_eq!(symbols.definitions("main"), &[9]);
        // impl line and constructor are uses; the trailing comment is not counted twice
        assert_eq!(symbols.usages("delegationpolicy"), &[5, 10]);
        assert!(symbols.usages("fn").is_empty());
    }

    #[test]
    fn python_definitions() {
        let src = "class Planner:\n    async def run(self):\n        return helper()  # helper\n\ndef helper():\n    pass\n";
        let symbols = FileSymbols::extract(src, Language::Python);
        assert_eq!(symbols.definitions("planner"), &[1]);
        assert_eq!(symbols.definitions("run"), &[2]);
        assert_eq!(symbols.definitions("helper"), &[5]);
        assert_eq!(symbols.usages("helper"), &[3]);
    }

    #[test]
    fn javascript_and_go_definitions() {
        let js = "export async function fetchAll() {}\nexport const limit = 3;\nclass Store {}\n";
        let symbols = FileSymbols::extract(js, Language::JavaScript);
        assert_eq!(symbols.definitions("fetchall"), &[1]);
        assert_eq!(symbols.definitions("limit"), &[2]);
        assert_eq!(symbols.definitions("store"), &[3]);

        let go = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Serve() {}\nfunc main() {}\n";
        let symbols = FileSymbols::extract(go, Language::Go);
        assert_eq!(symbols.definitions("server"), &[3]);
        assert_eq!(symbols.definitions("serve"), &[5]);
        assert_eq!(symbols.usages("server"), &[5]);
    }

    #[tokio::test]
    async fn summaries_are_memoized_by_content() {
        let store = Arc::new(MemoryStore::new());
        let index = SymbolIndex::new(store.clone());

        let first = index.summarize("src/lib.rs", RUST_SRC.as_bytes()).await.unwrap();
        let cached = store.lookup(RUST_SRC.as_bytes(), PARSER_VERSION).await.unwrap();
        assert!(cached.is_some());

        // Same bytes under another name hit the same entry
        let second = index.summarize("copy/lib.rs", RUST_SRC.as_bytes()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unreadable_cache_entry_is_rescanned() {
        let store = Arc::new(MemoryStore::new());
        store
            .memoize(RUST_SRC.as_bytes(), PARSER_VERSION, b"not json", CasMetadata::new("text/plain"))
            .await
            .unwrap();
        let index = SymbolIndex::new(store);
        let symbols = index.summarize("src/lib.rs", RUST_SRC.as_bytes()).await.unwrap();
        assert_eq!(symbols.definitions("main"), &[9]);
    }

    #[tokio::test]
    async fn unsupported_language_yields_none() {
        let index = SymbolIndex::new(Arc::new(MemoryStore::new()));
        assert!(index.summarize("notes.txt", b"fn main() {}").await.is_none());
    }
}
