//! Data model for execution traces and usage snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A model completion call.
    ModelCall,
    /// A tool execution, retries included.
    ToolExecution,
    /// A delegate call.
    Delegation,
    /// One planner stage.
    PlannerStage,
    /// Verifier gate pass over a turn's claims.
    Verification,
    /// One full loop cycle.
    Turn,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ModelCall => "model_call",
            Self::ToolExecution => "tool_execution",
            Self::Delegation => "delegation",
            Self::PlannerStage => "planner_stage",
            Self::Verification => "verification",
            Self::Turn => "turn",
        };
        f.write_str(s)
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label (tool name, model name, agent name).
    pub label: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: Option<u64>,
    /// Tokens consumed (model calls and delegates).
    pub tokens: Option<u32>,
    /// Whether the operation succeeded.
    pub success: Option<bool>,
}

impl Span {
    /// Create a new span with the given kind and label.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            started_at: Utc::now(),
            duration_ms: None,
            tokens: None,
            success: None,
        }
    }

    /// Mark the span as ended with the given success status.
    pub fn end(&mut self, success: bool) {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        self.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
        self.success = Some(success);
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans recorded for one research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace id.
    pub id: String,
    /// Session this trace belongs to.
    pub session_id: String,
    /// Spans in recording order.
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }

    pub fn total_tokens(&self) -> u64 {
        self.spans.iter().filter_map(|s| s.tokens).map(u64::from).sum()
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────

/// Point-in-time view of everything the engine has counted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub model_calls: u64,
    pub tool_executions: u64,
    pub delegations: u64,
    pub total_tokens: u64,
    pub active_traces: usize,
    /// Named counters (`calls.<agent>`, `deny.<agent>.<reason>`, ...)
    pub counters: BTreeMap<String, u64>,
}
