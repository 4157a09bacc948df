//! Delegation policy: fixed per-agent call budgets for sub-agents.
//!
//! Each known agent has a [`DelegationBudget`] created at session start and
//! never replenished. [`DelegationPolicy::decide`] claims a call atomically,
//! so concurrent delegations can never push `used_calls` past `max_calls`.
//! Every decision bumps a counter: `calls.<agent>` and `calls.total` on
//! allow, `deny.<agent>.<reason>` on deny.

use crate::token::{estimate_tokens, truncate_to_tokens};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};
use veritas_config::DelegationConfig;
use veritas_core::error::ProviderError;
use veritas_core::message::Message;
use veritas_core::provider::{Provider, ProviderRequest, ToolDefinition};
use veritas_telemetry::Metrics;

/// Name of the pseudo-tool the model calls to delegate.
pub const DELEGATE_TOOL: &str = "delegate";

/// Appended to a delegate response that was cut to its budget.
pub const TRUNCATED_MARKER: &str = " … [truncated]";

#[derive(Debug)]
pub struct DelegationBudget {
    pub agent_name: String,
    pub max_calls: u32,
    pub tokens_per_call: u32,
    pub model: Option<String>,
    used_calls: AtomicU32,
}

impl DelegationBudget {
    pub fn new(agent_name: impl Into<String>, max_calls: u32, tokens_per_call: u32) -> Self {
        Self {
            agent_name: agent_name.into(),
            max_calls,
            tokens_per_call,
            model: None,
            used_calls: AtomicU32::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn used_calls(&self) -> u32 {
        self.used_calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u32 {
        self.max_calls.saturating_sub(self.used_calls())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownAgent,
    BudgetExhausted,
    TokenCapExceeded,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownAgent => "unknown_agent",
            Self::BudgetExhausted => "budget_exhausted",
            Self::TokenCapExceeded => "token_cap_exceeded",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct DelegationPolicy {
    budgets: BTreeMap<String, DelegationBudget>,
    compress_target_tokens: usize,
    metrics: Arc<Metrics>,
}

impl DelegationPolicy {
    pub fn new(
        budgets: impl IntoIterator<Item = DelegationBudget>,
        compress_target_tokens: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            budgets: budgets
                .into_iter()
                .map(|b| (b.agent_name.clone(), b))
                .collect(),
            compress_target_tokens,
            metrics,
        }
    }

    /// Fresh budgets for one session.
    pub fn from_config(config: &DelegationConfig, metrics: Arc<Metrics>) -> Self {
        let budgets = config.agents.iter().map(|(name, agent)| {
            let budget = DelegationBudget::new(name, agent.max_calls, agent.tokens_per_call);
            match &agent.model {
                Some(model) => budget.with_model(model),
                None => budget,
            }
        });
        Self::new(budgets, config.compress_target_tokens, metrics)
    }

    pub fn budget(&self, agent: &str) -> Option<&DelegationBudget> {
        self.budgets.get(agent)
    }

    pub fn agents(&self) -> Vec<&str> {
        self.budgets.keys().map(String::as_str).collect()
    }

    /// Calls used so far, per agent.
    pub fn usage(&self) -> BTreeMap<String, u32> {
        self.budgets
            .iter()
            .map(|(name, b)| (name.clone(), b.used_calls()))
            .collect()
    }

    fn deny(&self, agent: &str, reason: DenyReason) -> Result<(), DenyReason> {
        self.metrics.increment(&format!("deny.{agent}.{reason}"));
        warn!(agent, reason = %reason, "Delegation denied");
        Err(reason)
    }

    /// Claim one call for `agent`, or say why not.
    pub fn decide(&self, agent: &str, estimated_tokens: u32) -> Result<(), DenyReason> {
        let Some(budget) = self.budgets.get(agent) else {
            return self.deny(agent, DenyReason::UnknownAgent);
        };
        if budget.used_calls() >= budget.max_calls {
            return self.deny(agent, DenyReason::BudgetExhausted);
        }
        if estimated_tokens > budget.tokens_per_call {
            return self.deny(agent, DenyReason::TokenCapExceeded);
        }
        let claimed = budget
            .used_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < budget.max_calls).then_some(used + 1)
            });
        match claimed {
            Ok(previous) => {
                self.metrics.increment(&format!("calls.{agent}"));
                self.metrics.increment("calls.total");
                debug!(agent, used = previous + 1, max = budget.max_calls, "Delegation allowed");
                Ok(())
            }
            Err(_) => self.deny(agent, DenyReason::BudgetExhausted),
        }
    }

    pub fn allow(&self, agent: &str, estimated_tokens: u32) -> bool {
        self.decide(agent, estimated_tokens).is_ok()
    }

    /// Token target for `agent`'s responses.
    pub fn response_target(&self, agent: &str) -> usize {
        let per_call = self
            .budgets
            .get(agent)
            .map_or(self.compress_target_tokens, |b| b.tokens_per_call as usize);
        per_call.min(self.compress_target_tokens)
    }

    pub fn compress(&self, agent: &str, response: &str) -> String {
        compress_response(response, self.response_target(agent))
    }
}

/// Cut `text` to `max_tokens` (chars/4 estimate), back to the last sentence
/// end when that lies past the 20th character, else to the last word
/// boundary, and mark the cut.
pub fn compress_response(text: &str, max_tokens: usize) -> String {
    let text = text.trim();
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let cut = truncate_to_tokens(text, max_tokens);
    let kept = match cut.rfind(['.', '!', '?']) {
        Some(pos) if pos > 20 => &cut[..=pos],
        _ => match cut.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => &cut[..pos],
            _ => cut,
        },
    };
    format!("{}{TRUNCATED_MARKER}", kept.trim_end())
}

/// Tool schema for the `delegate` pseudo-tool.
pub fn delegate_definition(agents: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: DELEGATE_TOOL.into(),
        description: format!(
            "Hand a self-contained task to a sub-agent ({}). Each agent has a small fixed call budget for the session; a denied call means continue without it.",
            agents.join(", ")
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "enum": agents,
                    "description": "Which sub-agent to use"
                },
                "task": {
                    "type": "string",
                    "description": "The task, with all context the sub-agent needs"
                }
            },
            "required": ["agent", "task"]
        }),
    }
}

// ── Delegates ─────────────────────────────────────────────────────────────

/// Runs a delegated task.
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn run(
        &self,
        agent: &str,
        task: &str,
        max_tokens: u32,
        model: Option<&str>,
    ) -> Result<String, ProviderError>;
}

/// A delegate backed by a model provider, one system prompt per agent role.
pub struct ProviderDelegate {
    provider: Arc<dyn Provider>,
    default_model: String,
    temperature: f32,
}

impl ProviderDelegate {
    pub fn new(provider: Arc<dyn Provider>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn role_prompt(agent: &str) -> String {
        match agent {
            "summarizer" => "You are a summarization sub-agent. Condense the material into the facts that matter. Keep file paths, line numbers and URLs exactly as given.".into(),
            "reasoner" => "You are a reasoning sub-agent. Work through the problem carefully, then state a concise conclusion.".into(),
            other => format!("You are the {other} sub-agent. Complete the task concisely."),
        }
    }
}

#[async_trait]
impl Delegate for ProviderDelegate {
    async fn run(
        &self,
        agent: &str,
        task: &str,
        max_tokens: u32,
        model: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut request = ProviderRequest::plain(
            model.unwrap_or(&self.default_model),
            vec![Message::system(Self::role_prompt(agent)), Message::user(task)],
            self.temperature,
        );
        request.max_tokens = Some(max_tokens);
        Ok(self.provider.complete(request).await?.content)
    }
}
