//! Paper search: literature lookup behind a pluggable evidence source.
//!
//! [`EvidenceSource`] hides the upstream API; [`SemanticScholarSource`] is
//! the bundled HTTP implementation. Upstream 429/5xx and network failures
//! surface as transient [`ToolError`]s so the orchestrator retries them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use veritas_core::error::ToolError;
use veritas_core::evidence::Evidence;
use veritas_core::tool::{Parameters, Tool, ToolResult};

const TOOL_NAME: &str = "search_papers";

/// A normalized bibliographic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    pub url: String,
    /// Abstract excerpt or other summary text
    #[serde(default)]
    pub snippet: String,
}

impl PaperRecord {
    pub fn to_evidence(&self) -> Evidence {
        let snippet = if self.snippet.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.snippet)
        };
        Evidence::document(&self.url, snippet)
    }
}

/// Something that can answer a literature query.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PaperRecord>, ToolError>;
}

// ── Semantic Scholar ──────────────────────────────────────────────────────

/// Semantic Scholar Graph API client.
pub struct SemanticScholarSource {
    base_url: String,
    client: reqwest::Client,
}

impl SemanticScholarSource {
    pub fn new(timeout: Duration) -> Result<Self, ToolError> {
        Self::with_base_url("https://api.semanticscholar.org/graph/v1", timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("veritas/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct S2Response {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
struct S2Paper {
    #[serde(rename = "paperId")]
    paper_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    #[serde(default)]
    name: String,
}

fn normalize(paper: S2Paper) -> Option<PaperRecord> {
    let title = paper.title.filter(|t| !t.trim().is_empty())?;
    let url = paper
        .url
        .unwrap_or_else(|| format!("https://www.semanticscholar.org/paper/{}", paper.paper_id));
    let snippet: String = paper
        .abstract_text
        .unwrap_or_default()
        .split_whitespace()
        .take(60)
        .collect::<Vec<_>>()
        .join(" ");
    Some(PaperRecord {
        title: title.trim().to_string(),
        authors: paper.authors.into_iter().map(|a| a.name).filter(|n| !n.is_empty()).collect(),
        year: paper.year,
        url,
        snippet,
    })
}

#[async_trait]
impl EvidenceSource for SemanticScholarSource {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PaperRecord>, ToolError> {
        let url = format!("{}/paper/search", self.base_url);
        let limit = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("limit", limit.as_str()),
                ("fields", "title,authors,year,url,abstract"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool_name: TOOL_NAME.into(),
                        timeout_secs: 0,
                    }
                } else {
                    ToolError::Unavailable {
                        tool_name: TOOL_NAME.into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ToolError::Upstream {
                tool_name: TOOL_NAME.into(),
                status,
            });
        }
        let body: S2Response = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: format!("unreadable response: {e}"),
        })?;
        Ok(body.data.into_iter().filter_map(normalize).collect())
    }
}

// ── Tool ──────────────────────────────────────────────────────────────────

/// `search_papers`: literature search returning document citations.
pub struct SearchPapersTool {
    source: Arc<dyn EvidenceSource>,
}

impl SearchPapersTool {
    pub fn new(source: Arc<dyn EvidenceSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for SearchPapersTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search academic literature. Returns titles, authors, year, URL and an abstract excerpt for each paper."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Literature search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of papers to return (default 5)"
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
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' parameter".into()))?;
        let limit = parameters
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map_or(5, |n| n.clamp(1, 20) as usize);

        let records = self.source.search(query, limit).await?;
        debug!(source = self.source.name(), query, found = records.len(), "Paper search complete");

        if records.is_empty() {
            return Ok(ToolResult::ok(format!("No papers found for {query:?}"), Vec::new()));
        }

        let output = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let year = r.year.map_or_else(|| "n.d.".to_string(), |y| y.to_string());
                let authors = match r.authors.len() {
                    0 => "unknown authors".to_string(),
                    1..=3 => r.authors.join(", "),
                    _ => format!("{} et al.", r.authors[0]),
                };
                format!("{}. {} ({authors}, {year})\n   {}\n   {}", i + 1, r.title, r.url, r.snippet)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let citations = records.iter().map(PaperRecord::to_evidence).collect();
        Ok(ToolResult::ok(output, citations)
            .with_data(serde_json::to_value(&records).unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::evidence::EvidenceKind;

    struct FixedSource(Vec<PaperRecord>);

    #[async_trait]
    impl EvidenceSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<PaperRecord>, ToolError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct DownSource;

    #[async_trait]
    impl EvidenceSource for DownSource {
        fn name(&self) -> &str {
            "down"
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<PaperRecord>, ToolError> {
            Err(ToolError::Upstream {
                tool_name: TOOL_NAME.into(),
                status: 503,
            })
        }
    }

    fn record(title: &str, url: &str) -> PaperRecord {
        PaperRecord {
            title: title.into(),
            authors: vec!["A. Author".into()],
            year: Some(2023),
            url: url.into(),
            snippet: "We study agents.".into(),
        }
    }

    fn params(v: serde_json::Value) -> Parameters {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn citations_use_url_domain() {
        let tool = SearchPapersTool::new(Arc::new(FixedSource(vec![
            record("ReAct", "https://arxiv.org/abs/2210.03629"),
            record("Toolformer", "https://www.semanticscholar.org/paper/abc"),
        ])));
        let result = tool.execute(&params(serde_json::json!({"query": "react agents"}))).await.unwrap();
        assert!(result.success);
        assert_eq!(result.citations.len(), 2);
        assert_eq!(result.citations[0].domain_or_file, "arxiv.org");
        assert_eq!(result.citations[0].kind, EvidenceKind::Document);
        assert!(result.output.contains("ReAct (A. Author, 2023)"));
    }

    #[tokio::test]
    async fn limit_is_forwarded() {
        let tool = SearchPapersTool::new(Arc::new(FixedSource(vec![
            record("One", "https://a.org/1"),
            record("Two", "https://b.org/2"),
        ])));
        let result = tool
            .execute(&params(serde_json::json!({"query": "x y z", "max_results": 1})))
            .await
            .unwrap();
        assert_eq!(result.citations.len(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_is_transient() {
        let tool = SearchPapersTool::new(Arc::new(DownSource));
        let err = tool.execute(&params(serde_json::json!({"query": "q"}))).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn empty_query_rejected() {
        let tool = SearchPapersTool::new(Arc::new(FixedSource(vec![])));
        assert!(tool.execute(&params(serde_json::json!({"query": "  "}))).await.is_err());
    }

    #[test]
    fn semantic_scholar_records_are_normalized() {
        let raw = serde_json::json!({
            "data": [
                {"paperId": "p1", "title": "Deep Research", "authors": [{"name": "X"}], "year": 2024,
                 "url": null, "abstract": "An abstract."},
                {"paperId": "p2", "title": null}
            ]
        });
        let body: S2Response = serde_json::from_value(raw).unwrap();
        let records: Vec<PaperRecord> = body.data.into_iter().filter_map(normalize).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://www.semanticscholar.org/paper/p1");
        assert_eq!(records[0].snippet, "An abstract.");
    }
}
