//! The research loop and its controllers.
//!
//! The [`Orchestrator`] runs every question through a fixed cycle:
//!
//! 1. **Plan**: build the turn prompt from the question, the compressed
//!    report and the latest observations
//! 2. **Dispatch**: parse the model's reply into tool calls
//! 3. **Execute**: run the calls, with retries, timeouts and budgets
//! 4. **Observe**: append every citation to the evidence log
//! 5. **Verify**: admit claims through the verifier gate
//! 6. **Compress**: fold the turn into the report and measure drift
//!
//! The loop stops when the model gives a final answer that passes the
//! completion checklist, or when a budget runs out.

pub mod claims;
pub mod delegation;
pub mod drift;
pub mod evidence_log;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod state;
pub mod token;
pub mod verifier;

#[cfg(test)]
mod test_helpers;

pub use delegation::{Delegate, DelegationBudget, DelegationPolicy, DenyReason, ProviderDelegate};
pub use drift::{ControlParams, DriftMonitor, DriftTick, Recommendation};
pub use evidence_log::{EvidenceLog, EvidenceRecord};
pub use orchestrator::{DriftRecord, FinalResult, Orchestrator, Outcome, SessionStats, offered_tools};
pub use parser::{ParseFailure, ParseOutcome, ParsedItem, parse};
pub use planner::{AdaptivePlanner, ScanOutcome, Tier};
pub use report::{EntryKind, Report, ReportEntry};
pub use retry::RetryPolicy;
pub use state::{ConversationState, LoopState};
pub use verifier::{ClaimValidator, ModelValidator, ValidatorChoice, VerifierGate};
