//! Execution tracing and metrics for Veritas.
//!
//! Provides span-based tracing of every loop action (model calls, tool
//! executions, delegations, verification passes) and a registry of named
//! counters used by the delegation policy and the orchestrator.

pub mod engine;
pub mod metrics;
pub mod model;

pub use engine::TelemetryEngine;
pub use metrics::Metrics;
pub use model::{Span, SpanKind, Trace, UsageSnapshot};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
