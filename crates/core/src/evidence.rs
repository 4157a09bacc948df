//! Evidence, claims and observations.
//!
//! - **Evidence** is a citation: a snippet at a location inside a file or
//!   under a domain. Two pieces of evidence are independent when their
//!   `domain_or_file` differ.
//! - **Claim** is a statement plus the evidence supporting it. Only the
//!   verifier moves a claim out of `Unverified`.
//! - **Observation** is what one executed tool call produced. Failures are
//!   observations too; nothing a tool does is raised to the caller.

use serde::{Deserialize, Serialize};
use crate::error::ErrorKind;

/// What a citation points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Symbol definition site from the symbol index.
    Definition,
    /// Symbol usage site from the symbol index.
    Usage,
    /// A matching line or range in a file.
    Text,
    /// An external document (paper, web page).
    Document,
    /// Output of sandboxed execution.
    Execution,
}

/// A single citation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    /// Stable identifier of the cited thing (e.g. `src/lib.rs:42`, a DOI)
    pub source_id: String,

    /// The cited text
    pub snippet: String,

    /// Human-readable location (path:line or URL)
    pub location: String,

    /// File path or domain; the unit of independence
    pub domain_or_file: String,

    /// What kind of site this is
    pub kind: EvidenceKind,

    /// Symbol name for definition/usage evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl Evidence {
    /// Evidence for a line or range in a workspace file.
    pub fn file(path: &str, line: usize, snippet: impl Into<String>) -> Self {
        let location = format!("{path}:{line}");
        Self {
            source_id: location.clone(),
            snippet: snippet.into(),
            location,
            domain_or_file: path.to_string(),
            kind: EvidenceKind::Text,
            symbol: None,
        }
    }

    /// Evidence for a symbol definition or usage site.
    pub fn symbol_site(
        path: &str,
        line: usize,
        symbol: &str,
        kind: EvidenceKind,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            symbol: Some(symbol.to_string()),
            ..Self::file(path, line, snippet)
        }
    }

    /// Evidence for an external document; the domain is taken from the URL host.
    pub fn document(url: &str, snippet: impl Into<String>) -> Self {
        Self {
            source_id: url.to_string(),
            snippet: snippet.into(),
            location: url.to_string(),
            domain_or_file: url_domain(url).unwrap_or(url).to_string(),
            kind: EvidenceKind::Document,
            symbol: None,
        }
    }

    /// The key used to decide independence between citations.
    pub fn independence_key(&self) -> String {
        self.domain_or_file.trim().to_ascii_lowercase()
    }
}

/// Extract the host of an `http(s)://` URL.
pub fn url_domain(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then_some(host)
}

/// Verification state of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    Rejected,
}

/// A statement with its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// The claim text
    pub text: String,

    /// Supporting citations, deduplicated by `source_id`
    pub supporting_evidence: Vec<Evidence>,

    /// Current verification state
    pub status: VerificationStatus,
}

impl Claim {
    /// A fresh, unverified claim.
    pub fn new(text: impl Into<String>, evidence: Vec<Evidence>) -> Self {
        let mut supporting_evidence: Vec<Evidence> = Vec::with_capacity(evidence.len());
        for e in evidence {
            if !supporting_evidence.iter().any(|s| s.source_id == e.source_id) {
                supporting_evidence.push(e);
            }
        }
        Self {
            text: text.into(),
            supporting_evidence,
            status: VerificationStatus::Unverified,
        }
    }

    /// Number of distinct files or domains among the citations.
    pub fn independent_sources(&self) -> usize {
        let mut keys: Vec<String> = self
            .supporting_evidence
            .iter()
            .map(Evidence::independence_key)
            .collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }

    /// Whether the citations include a definition and a usage of the same symbol.
    pub fn has_definition_usage_pair(&self) -> bool {
        self.supporting_evidence
            .iter()
            .filter(|e| e.kind == EvidenceKind::Definition)
            .any(|def| {
                self.supporting_evidence.iter().any(|u| {
                    u.kind == EvidenceKind::Usage && u.symbol.is_some() && u.symbol == def.symbol
                })
            })
    }
}

/// The result of one executed (or failed-to-parse) tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// The call this observation answers
    pub call_id: String,

    /// Tool that produced it
    pub tool_name: String,

    /// Raw output (already size-capped by the tool)
    pub raw_output: String,

    /// Ordered citations
    #[serde(default)]
    pub citations: Vec<Evidence>,

    /// Whether the call succeeded
    pub success: bool,

    /// Failure classification when `success` is false, or a soft flag
    /// such as truncated output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Observation {
    /// A failed observation carrying an error message for the model.
    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            raw_output: message.into(),
            citations: Vec::new(),
            success: false,
            error_kind: Some(kind),
        }
    }

    /// Whether the underlying execution hit its wall-clock limit.
    pub fn timed_out(&self) -> bool {
        self.error_kind == Some(ErrorKind::SandboxTimeout)
    }
}
