//! The research loop state machine.
//!
//! `PLANNING → DISPATCH → EXECUTE → OBSERVE → VERIFY → COMPRESS → PLANNING`,
//! with `ANSWERED` and `INCOMPLETE` terminal. A final-answer candidate goes
//! `PLANNING → VERIFY` for the completion checklist, and a turn whose
//! calls all failed to parse skips `EXECUTE`. Every non-terminal state may
//! bail out to `INCOMPLETE`.

use serde::{Deserialize, Serialize};
use veritas_core::error::{Error, Result};
use crate::report::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Planning,
    Dispatch,
    Execute,
    Observe,
    Verify,
    Compress,
    Answered,
    Incomplete,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::Incomplete)
    }

    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Planning, Dispatch | Verify)
            | (Dispatch, Execute | Observe)
            | (Execute, Observe)
            | (Observe, Verify)
            | (Verify, Compress | Answered)
            | (Compress, Planning) => true,
            (from, Incomplete) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "PLANNING",
            Self::Dispatch => "DISPATCH",
            Self::Execute => "EXECUTE",
            Self::Observe => "OBSERVE",
            Self::Verify => "VERIFY",
            Self::Compress => "COMPRESS",
            Self::Answered => "ANSWERED",
            Self::Incomplete => "INCOMPLETE",
        };
        f.write_str(s)
    }
}

/// Everything the loop carries between turns: `{Q, R_t, O_t}` plus counters.
///
/// The question never changes after construction; the tool-call counter
/// only moves through [`ConversationState::try_consume_tool_call`], which
/// refuses to go past the budget.
#[derive(Debug, Clone)]
pub struct ConversationState {
    question: String,
    /// R_t, the compressed report.
    pub report: Report,
    /// O_t, the compressed summary of the latest observations.
    pub observation: String,
    pub turn_count: u32,
    tool_call_count: u32,
    max_tool_calls: u32,
    state: LoopState,
}

impl ConversationState {
    pub fn new(question: impl Into<String>, max_tool_calls: u32, report: Report) -> Self {
        Self {
            question: question.into(),
            report,
            observation: String::new(),
            turn_count: 0,
            tool_call_count: 0,
            max_tool_calls,
            state: LoopState::Planning,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_call_count
    }

    pub fn remaining_budget(&self) -> u32 {
        self.max_tool_calls.saturating_sub(self.tool_call_count)
    }

    /// Count one tool call against the budget. `false` once the budget is spent.
    pub fn try_consume_tool_call(&mut self) -> bool {
        if self.tool_call_count >= self.max_tool_calls {
            return false;
        }
        self.tool_call_count += 1;
        true
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: LoopState) -> Result<LoopState> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Invariant(format!(
                "illegal transition {} -> {next}",
                self.state
            )));
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_is_legal() {
        let mut s = ConversationState::new("q", 10, Report::new(100));
        for next in [
            LoopState::Dispatch,
            LoopState::Execute,
            LoopState::Observe,
            LoopState::Verify,
            LoopState::Compress,
            LoopState::Planning,
            LoopState::Verify,
            LoopState::Answered,
        ] {
            s.transition(next).unwrap();
        }
        assert!(s.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut s = ConversationState::new("q", 10, Report::new(100));
        s.transition(LoopState::Incomplete).unwrap();
        assert!(s.transition(LoopState::Planning).is_err());
        assert!(s.transition(LoopState::Incomplete).is_err());
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut s = ConversationState::new("q", 10, Report::new(100));
        let err = s.transition(LoopState::Compress).unwrap_err();
        assert!(err.to_string().contains("PLANNING -> COMPRESS"));
        assert_eq!(s.state(), LoopState::Planning);
        assert!(!LoopState::Planning.can_transition_to(LoopState::Answered));
    }

    #[test]
    fn tool_budget_is_never_exceeded() {
        let mut s = ConversationState::new("q", 2, Report::new(100));
        assert!(s.try_consume_tool_call());
        assert!(s.try_consume_tool_call());
        assert!(!s.try_consume_tool_call());
        assert_eq!(s.tool_call_count(), 2);
        assert_eq!(s.remaining_budget(), 0);
    }

    #[test]
    fn state_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&LoopState::Incomplete).unwrap(), "\"INCOMPLETE\"");
        assert_eq!(LoopState::Answered.to_string(), "ANSWERED");
    }
}
