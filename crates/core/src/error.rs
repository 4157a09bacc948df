//! Error types for the Veritas domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; per-call failures are
//! additionally classified into an [`ErrorKind`] so they can travel inside
//! an Observation instead of being raised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a research session.
///
/// Per-call failures never surface here: provider, tool and store errors are
/// absorbed into Observations or gaps where they happen. Each crate keeps its
/// own enum (`CasError`, `ConfigError`, `TelemetryError`) and the CLI reports
/// them through `anyhow`.
#[derive(Debug, Error)]
pub enum Error {
    // --- Loop invariants ---
    #[error("State machine invariant violated: {0}")]
    Invariant(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failure that was absorbed into an Observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed tool-call text from the model.
    Parse,
    /// A tool failed in a way a retry might fix.
    ToolTransient,
    /// A tool failed in a way retries cannot fix.
    ToolPermanent,
    /// A claim was rejected by the verifier.
    Verification,
    /// A delegation or tool-call budget was hit.
    BudgetExhausted,
    /// Sandbox wall-clock limit reached; output is partial.
    SandboxTimeout,
    /// Sandbox output exceeded its cap; output is truncated.
    SandboxOverflow,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Parse => "parse_error",
            Self::ToolTransient => "tool_transient",
            Self::ToolPermanent => "tool_permanent",
            Self::Verification => "verification_failure",
            Self::BudgetExhausted => "budget_exhausted",
            Self::SandboxTimeout => "sandbox_timeout",
            Self::SandboxOverflow => "sandbox_overflow",
        };
        f.write_str(s)
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code == 429 || *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool temporarily unavailable: {tool_name}: {reason}")]
    Unavailable { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Upstream returned status {status} for {tool_name}")]
    Upstream { tool_name: String, status: u16 },

    #[error("Path outside workspace: {0}")]
    PathOutsideWorkspace(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_)
            | Self::ExecutionFailed { .. }
            | Self::PathOutsideWorkspace(_)
            | Self::InvalidArguments(_) => false,
        }
    }

    /// The kind recorded on the failed Observation.
    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::ToolTransient
        } else {
            ErrorKind::ToolPermanent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_error_displays_correctly() {
        let err = Error::Invariant("Plan -> Done".into());
        assert_eq!(err.to_string(), "State machine invariant violated: Plan -> Done");
    }

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 503,
            message: "Service unavailable".into(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service unavailable"));
    }

    #[test]
    fn provider_transience() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(
            ProviderError::ApiError {
                status_code: 502,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn tool_error_classification() {
        let timeout = ToolError::Timeout {
            tool_name: "search_code".into(),
            timeout_secs: 60,
        };
        assert_eq!(timeout.kind(), ErrorKind::ToolTransient);

        let upstream = ToolError::Upstream {
            tool_name: "search_papers".into(),
            status: 429,
        };
        assert!(upstream.is_transient());

        let bad_args = ToolError::InvalidArguments("missing 'query'".into());
        assert_eq!(bad_args.kind(), ErrorKind::ToolPermanent);
    }

    #[test]
    fn error_kind_display_is_snake_case() {
        assert_eq!(ErrorKind::SandboxTimeout.to_string(), "sandbox_timeout");
        let json = serde_json::to_string(&ErrorKind::BudgetExhausted).unwrap();
        assert_eq!(json, "\"budget_exhausted\"");
    }
}
