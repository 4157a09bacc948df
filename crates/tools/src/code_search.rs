//! Code search: symbol-aware search over the workspace.
//!
//! Definition and usage sites from the [`SymbolIndex`] are reported before
//! plain line matches, since they make the stronger citations. A line
//! matches when it contains every query term (case-insensitive).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use veritas_core::error::ToolError;
use veritas_core::evidence::{Evidence, EvidenceKind};
use veritas_core::tool::{Parameters, Tool, ToolResult};
use crate::symbol_index::SymbolIndex;
use crate::workspace::Workspace;

/// Longest snippet kept per hit, in characters.
const SNIPPET_CHARS: usize = 200;

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub kind: EvidenceKind,
    pub symbol: Option<String>,
    pub snippet: String,
}

impl SearchHit {
    pub fn to_evidence(&self) -> Evidence {
        match &self.symbol {
            Some(symbol) => {
                Evidence::symbol_site(&self.path, self.line, symbol, self.kind, self.snippet.clone())
            }
            None => Evidence::file(&self.path, self.line, self.snippet.clone()),
        }
    }

    fn tag(&self) -> &'static str {
        match self.kind {
            EvidenceKind::Definition => "def",
            EvidenceKind::Usage => "use",
            _ => "match",
        }
    }
}

/// Lowercased word tokens longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() > 2)
    {
        let token = token.to_lowercase();
        if !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

#[derive(Default)]
struct FileMatches {
    defs: Vec<SearchHit>,
    uses: Vec<SearchHit>,
    text: Vec<SearchHit>,
}

/// Search engine shared by the `search_code` tool and the planner.
pub struct CodeSearcher {
    workspace: Arc<Workspace>,
    index: Arc<SymbolIndex>,
    max_file_bytes: u64,
}

impl CodeSearcher {
    pub fn new(workspace: Arc<Workspace>, index: Arc<SymbolIndex>, max_file_bytes: u64) -> Self {
        Self {
            workspace,
            index,
            max_file_bytes,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Search `scope` (a file or directory, default the whole workspace).
    pub async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let terms = query_terms(query);
        if terms.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let start = match scope {
            Some(s) if !s.trim().is_empty() && s.trim() != "." => self.workspace.resolve(s)?,
            _ => self.workspace.root().to_path_buf(),
        };
        let files = if start.is_file() {
            vec![self.workspace.relative(&start)]
        } else {
            self.workspace
                .files_under(&start, self.max_file_bytes)
                .into_iter()
                .map(|f| f.relative)
                .collect()
        };

        let mut all = FileMatches::default();
        for file in &files {
            let Some(found) = self.scan(file, &terms, max_results).await else {
                continue;
            };
            all.defs.extend(found.defs);
            all.uses.extend(found.uses);
            all.text.extend(found.text);
        }

        debug!(query, files = files.len(), "Code search complete");
        Ok(merge(all, max_results))
    }

    /// Hits for a single workspace-relative file; used by planner stages.
    pub async fn search_file(&self, relative: &str, terms: &[String]) -> Vec<SearchHit> {
        match self.scan(relative, terms, usize::MAX).await {
            Some(found) => merge(found, usize::MAX),
            None => Vec::new(),
        }
    }

    async fn scan(&self, relative: &str, terms: &[String], cap: usize) -> Option<FileMatches> {
        let path = self.workspace.resolve(relative).ok()?;
        let bytes = tokio::fs::read(&path).await.ok()?;
        if bytes.len() as u64 > self.max_file_bytes || bytes.contains(&0) {
            return None;
        }
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let snippet_at = |line: usize| {
            lines
                .get(line.saturating_sub(1))
                .map(|l| truncate_chars(l.trim(), SNIPPET_CHARS))
                .unwrap_or_default()
        };

        let mut found = FileMatches::default();
        if let Some(symbols) = self.index.summarize(relative, &bytes).await {
            for term in terms {
                for &line in symbols.definitions(term).iter().take(cap) {
                    found.defs.push(SearchHit {
                        path: relative.to_string(),
                        line,
                        kind: EvidenceKind::Definition,
                        symbol: Some(term.clone()),
                        snippet: snippet_at(line),
                    });
                }
                for &line in symbols.usages(term).iter().take(cap) {
                    found.uses.push(SearchHit {
                        path: relative.to_string(),
                        line,
                        kind: EvidenceKind::Usage,
                        symbol: Some(term.clone()),
                        snippet: snippet_at(line),
                    });
                }
            }
        }

        for (idx, line) in lines.iter().enumerate() {
            if found.text.len() >= cap {
                break;
            }
            let lower = line.to_lowercase();
            if terms.iter().all(|t| lower.contains(t.as_str())) {
                found.text.push(SearchHit {
                    path: relative.to_string(),
                    line: idx + 1,
                    kind: EvidenceKind::Text,
                    symbol: None,
                    snippet: snippet_at(idx + 1),
                });
            }
        }
        Some(found)
    }
}

/// Definitions, then usages, then text matches; one hit per `path:line`.
fn merge(found: FileMatches, max_results: usize) -> Vec<SearchHit> {
    let mut seen: HashSet<(String, usize)> = HashSet::new();
    found
        .defs
        .into_iter()
        .chain(found.uses)
        .chain(found.text)
        .filter(|h| seen.insert((h.path.clone(), h.line)))
        .take(max_results)
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// `search_code`: the model-facing wrapper around [`CodeSearcher`].
pub struct SearchCodeTool {
    searcher: Arc<CodeSearcher>,
    default_max_results: usize,
}

impl SearchCodeTool {
    pub fn new(searcher: Arc<CodeSearcher>, default_max_results: usize) -> Self {
        Self {
            searcher,
            default_max_results: default_max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search the workspace for code. Returns symbol definitions and usages first, then lines containing every query term, each as path:line."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Words or symbol names to look for"
                },
                "path": {
                    "type": "string",
                    "description": "Optional file or directory to restrict the search to"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of hits (default 20)"
                }
            },
            "required": ["query"]
        })
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, parameters: &Parameters) -> Result<ToolResult, ToolError> {
        let query = parameters
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' parameter".into()))?;
        let scope = parameters.get("path").and_then(|v| v.as_str());
        let max_results = parameters
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map_or(self.default_max_results, |n| n.clamp(1, 200) as usize);

        let hits = self.searcher.search(query, scope, max_results).await?;
        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No matches for {query:?}"), Vec::new()));
        }

        let output = hits
            .iter()
            .map(|h| format!("{}:{} [{}] {}", h.path, h.line, h.tag(), h.snippet))
            .collect::<Vec<_>>()
            .join("\n");
        let citations = hits.iter().map(SearchHit::to_evidence).collect();
        Ok(ToolResult::ok(output, citations).with_data(serde_json::json!({ "hits": hits.len() })))
    }
}
