//! Thread-safe telemetry engine: collects spans per session and owns the
//! shared metrics registry.

use crate::TelemetryError;
use crate::metrics::Metrics;
use crate::model::*;
use std::sync::{Arc, PoisonError, RwLock};

/// The core telemetry engine.
///
/// Traces are kept in memory only; the oldest finished traces are dropped
/// once `max_traces` is reached.
pub struct TelemetryEngine {
    traces: RwLock<Vec<Trace>>,
    metrics: Arc<Metrics>,
    max_traces: usize,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(Metrics::new()))
    }

    /// Share an existing metrics registry.
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            metrics,
            max_traces: 256,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    // ── Trace management ──────────────────────────────────────────────

    /// Start a new trace for a session; returns the trace id.
    pub fn start_trace(&self, session_id: impl Into<String>) -> String {
        let trace = Trace::new(session_id);
        let id = trace.id.clone();
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        if traces.len() >= self.max_traces
            && let Some(pos) = traces.iter().position(|t| t.ended_at.is_some())
        {
            traces.remove(pos);
        }
        traces.push(trace);
        id
    }

    /// Mark a trace finished.
    pub fn end_trace(&self, trace_id: &str) -> Result<(), TelemetryError> {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let trace = traces
            .iter_mut()
            .find(|t| t.id == trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        trace.ended_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Record a completed span and bump the matching counters.
    pub fn record_span(&self, trace_id: &str, span: Span) -> Result<(), TelemetryError> {
        let counter = match span.kind {
            SpanKind::ModelCall => Some("model.calls"),
            SpanKind::ToolExecution => Some("tools.executions"),
            SpanKind::Delegation => Some("delegation.completed"),
            _ => None,
        };
        if let Some(name) = counter {
            self.metrics.increment(name);
        }
        if let Some(tokens) = span.tokens {
            self.metrics.add("tokens.total", u64::from(tokens));
        }

        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let trace = traces
            .iter_mut()
            .find(|t| t.id == trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        trace.spans.push(span);
        Ok(())
    }

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == trace_id)
            .cloned()
    }

    /// Serialize a trace for export.
    pub fn export_trace(&self, trace_id: &str) -> Result<String, TelemetryError> {
        let trace = self
            .get_trace(trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        Ok(serde_json::to_string_pretty(&trace)?)
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let active = self
            .traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.ended_at.is_none())
            .count();
        UsageSnapshot {
            model_calls: self.metrics.get("model.calls"),
            tool_executions: self.metrics.get("tools.executions"),
            delegations: self.metrics.get("delegation.completed"),
            total_tokens: self.metrics.get("tokens.total"),
            active_traces: active,
            counters: self.metrics.snapshot(),
        }
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
