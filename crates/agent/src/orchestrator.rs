//! The research loop.
//!
//! One [`Orchestrator::run`] drives a question through
//! `PLANNING → DISPATCH → EXECUTE → OBSERVE → VERIFY → COMPRESS` until the
//! model answers or a budget runs out. Only `{Q, R_t, O_t}` survives a turn:
//! observations are folded into the compressed report and the evidence log,
//! and the raw text is dropped.
//!
//! Per-call failures never escape: they become Observations the model sees
//! on the next turn. The caller always gets a [`FinalResult`], either
//! `ANSWERED` or `INCOMPLETE` with the gaps that were left open.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use veritas_cas::{CasMetadata, ContentStore};
use veritas_config::AppConfig;
use veritas_core::error::{Error, ErrorKind, ProviderError, ToolError};
use veritas_core::event::{DomainEvent, EventBus};
use veritas_core::evidence::{Claim, Observation, VerificationStatus};
use veritas_core::message::SessionId;
use veritas_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use veritas_core::tool::{Parameters, ToolCall, ToolRegistry, ToolResult};
use veritas_providers::ModelRouter;
use veritas_telemetry::{Metrics, Span, SpanKind, TelemetryEngine};
use veritas_tools::Toolkit;

use crate::claims::{
    annotate_answer, answer_claims, claim_from_observation, find_contradictions, uncited_assertions,
};
use crate::delegation::{
    DELEGATE_TOOL, Delegate, DelegationPolicy, DenyReason, ProviderDelegate, delegate_definition,
};
use crate::drift::{ControlParams, DriftMonitor, DriftTick};
use crate::evidence_log::{EvidenceLog, EvidenceRecord};
use crate::parser::{self, ParseFailure, ParsedItem};
use crate::planner::{
    AdaptivePlanner, MAX_RENDERED_HITS, SCAN_PROJECT_TOOL, scan_project_definition,
};
use crate::prompt::{SYSTEM_PROMPT, build_messages};
use crate::report::{ELLIPSIS, Report, compress_summary};
use crate::retry::RetryPolicy;
use crate::state::{ConversationState, LoopState};
use crate::token::{
    estimate_messages_tokens, estimate_tokens, estimate_tools_tokens, truncate_to_tokens,
};
use crate::verifier::{
    GateOutput, ModelValidator, ValidatorChoice, VerifierGate, completion_checklist,
};

/// Extra time a sandbox call gets over the sandbox's own limit.
const SANDBOX_GRACE: Duration = Duration::from_secs(2);

/// Longest headline kept per observation in a report note.
const HEADLINE_CHARS: usize = 160;

// ── Results ───────────────────────────────────────────────────────────────

/// A drift tick together with the parameters it produced for the next turn.
#[derive(Debug, Clone, Serialize)]
pub struct DriftRecord {
    #[serde(flatten)]
    pub tick: DriftTick,
    pub params: ControlParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub turns: u32,
    pub tool_calls: u32,
    pub model_calls: u32,
    pub drift: Vec<DriftRecord>,
    /// Delegate calls used, per agent
    pub delegation: BTreeMap<String, u32>,
    pub duration_ms: u64,
}

/// The session outcome handed to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Answered {
        answer: String,
        report: Report,
        evidence_log: Vec<EvidenceRecord>,
    },
    Incomplete {
        partial_report: Report,
        unresolved_gaps: Vec<String>,
    },
}

impl Outcome {
    pub fn report(&self) -> &Report {
        match self {
            Self::Answered { report, .. } => report,
            Self::Incomplete { partial_report, .. } => partial_report,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    pub outcome: Outcome,
    pub stats: SessionStats,
}

impl FinalResult {
    pub fn is_answered(&self) -> bool {
        matches!(self.outcome, Outcome::Answered { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Answered { answer, .. } => Some(answer),
            Outcome::Incomplete { .. } => None,
        }
    }

    pub fn gaps(&self) -> &[String] {
        match &self.outcome {
            Outcome::Answered { .. } => &[],
            Outcome::Incomplete { unresolved_gaps, .. } => unresolved_gaps,
        }
    }
}

// ── Session state ─────────────────────────────────────────────────────────

enum Ending {
    Answered(String),
    Incomplete(Vec<String>),
}

/// Everything one `run` owns. Dropped when the session ends.
struct Session {
    id: SessionId,
    trace_id: Option<String>,
    state: ConversationState,
    gate: VerifierGate,
    policy: DelegationPolicy,
    params: ControlParams,
    log: EvidenceLog,
    /// Claims admitted to the report so far, for contradiction checks
    claims: Vec<Claim>,
    drift: Vec<DriftRecord>,
    model_calls: u32,
}

/// One unit of dispatch. Consecutive `delegate` calls fan out together.
enum Step {
    Failure(ParseFailure),
    Call(ToolCall),
    Delegates(Vec<ToolCall>),
}

fn plan_steps(items: Vec<ParsedItem>) -> Vec<Step> {
    let mut steps: Vec<Step> = Vec::new();
    for item in items {
        match item {
            ParsedItem::Failure(failure) => steps.push(Step::Failure(failure)),
            ParsedItem::Call(call) if call.tool_name == DELEGATE_TOOL => match steps.last_mut() {
                Some(Step::Delegates(batch)) => batch.push(call),
                _ => steps.push(Step::Delegates(vec![call])),
            },
            ParsedItem::Call(call) => steps.push(Step::Call(call)),
        }
    }
    steps
}

// ── Orchestrator ──────────────────────────────────────────────────────────

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    planner: AdaptivePlanner,
    config: AppConfig,
    router: Arc<ModelRouter>,
    delegate: Arc<dyn Delegate>,
    validator: ValidatorChoice,
    retry: RetryPolicy,
    drift: DriftMonitor,
    event_bus: Option<Arc<EventBus>>,
    telemetry: Option<Arc<TelemetryEngine>>,
    store: Option<Arc<dyn ContentStore>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, toolkit: Toolkit, config: &AppConfig) -> Self {
        let delegate = Arc::new(ProviderDelegate::new(
            provider.clone(),
            config.model.primary.clone(),
        ));
        Self {
            planner: AdaptivePlanner::new(toolkit.searcher, config.planner.clone()),
            registry: toolkit.registry,
            router: Arc::new(ModelRouter::from_config(config)),
            delegate,
            validator: config.verifier.validator.into(),
            retry: RetryPolicy::from_config(&config.agent.retry),
            drift: DriftMonitor::new(config.drift.clone()),
            config: config.clone(),
            event_bus: None,
            telemetry: None,
            store: None,
            provider,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Memoize cacheable tool results in `store`.
    pub fn with_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_validator(mut self, validator: ValidatorChoice) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_router(mut self, router: ModelRouter) -> Self {
        self.router = Arc::new(router);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Schemas offered to the model, in name order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        offered_tools(&self.registry, &self.config)
    }

    /// Research `question` to a terminal state.
    pub async fn run(&self, question: &str) -> FinalResult {
        let started = Instant::now();
        let mut session = self.start_session(question);
        let timeout = Duration::from_secs(self.config.agent.session_timeout_secs);
        let deadline = started + timeout;

        let driven = tokio::time::timeout_at(deadline, self.drive(&mut session, deadline)).await;
        let ending = match driven {
            Ok(Ok(ending)) => ending,
            Ok(Err(e)) => {
                warn!(session = %session.id, error = %e, "Research loop aborted");
                Ending::Incomplete(vec![e.to_string()])
            }
            Err(_) => {
                warn!(session = %session.id, timeout_secs = timeout.as_secs(), "Session timed out");
                Ending::Incomplete(vec![format!(
                    "session timeout of {}s reached before an answer",
                    timeout.as_secs()
                )])
            }
        };
        self.finish(session, ending, started)
    }

    fn start_session(&self, question: &str) -> Session {
        let id = SessionId::new();
        let trace_id = self.telemetry.as_ref().map(|t| t.start_trace(id.to_string()));
        let metrics = self
            .telemetry
            .as_ref()
            .map(|t| t.metrics())
            .unwrap_or_else(|| Arc::new(Metrics::new()));

        let validator = ModelValidator::new(
            self.provider.clone(),
            self.router.primary(),
            self.config.verifier.validator_temperature,
        );
        let gate = VerifierGate::new(self.validator.clone(), self.config.agent.verify_k)
            .with_default_validator(Arc::new(validator));
        let params = ControlParams {
            compression_ratio: self.config.agent.compression_ratio,
            verify_k: gate.verify_k(),
            concurrency: self.config.planner.concurrency_cap,
        };

        info!(
            session = %id,
            max_tool_calls = self.config.agent.max_tool_calls,
            validator = gate.validator_name().unwrap_or("none"),
            "Research session starting"
        );
        Session {
            state: ConversationState::new(
                question,
                self.config.agent.max_tool_calls,
                Report::new(self.config.agent.report_cap_tokens),
            ),
            policy: DelegationPolicy::from_config(&self.config.delegation, metrics),
            log: EvidenceLog::new(),
            claims: Vec::new(),
            drift: Vec::new(),
            model_calls: 0,
            id,
            trace_id,
            gate,
            params,
        }
    }

    async fn drive(&self, s: &mut Session, deadline: Instant) -> Result<Ending, Error> {
        let tools = self.tool_definitions();
        loop {
            if s.state.turn_count >= self.config.agent.max_turns {
                return Ok(Ending::Incomplete(vec![format!(
                    "turn limit of {} reached without an answer",
                    self.config.agent.max_turns
                )]));
            }
            s.state.turn_count += 1;
            let turn = s.state.turn_count;
            let mut turn_span = Span::new(SpanKind::Turn, format!("turn {turn}"));
            debug!(session = %s.id, turn, remaining = s.state.remaining_budget(), "Turn starting");

            let response = match self.call_model(s, &tools).await {
                Ok(response) => response,
                Err(e) => {
                    turn_span.end(false);
                    self.record_span(s, turn_span);
                    return Ok(Ending::Incomplete(vec![format!("model call failed: {e}")]));
                }
            };

            let parsed = parser::parse(&response.content, &response.tool_calls);
            if parsed.items.is_empty() {
                let answer = parsed.final_answer.unwrap_or_default();
                self.transition(s, LoopState::Verify)?;
                let ending = self.finalize(s, turn, &answer).await?;
                turn_span.end(matches!(ending, Ending::Answered(_)));
                self.record_span(s, turn_span);
                return Ok(ending);
            }

            self.transition(s, LoopState::Dispatch)?;
            let (observations, budget_hit) = self.dispatch(s, parsed.items, deadline).await?;
            self.transition(s, LoopState::Observe)?;
            self.observe(s, turn, &observations);
            self.transition(s, LoopState::Verify)?;
            let verdicts = self.verify(s, turn, &observations).await;
            self.transition(s, LoopState::Compress)?;
            self.compress(s, turn, verdicts, &observations);
            turn_span.end(true);
            self.record_span(s, turn_span);

            if budget_hit {
                return Ok(Ending::Incomplete(vec![format!(
                    "tool-call budget of {} exhausted before an answer",
                    self.config.agent.max_tool_calls
                )]));
            }
            self.transition(s, LoopState::Planning)?;
        }
    }

    // ── Model ──

    async fn call_model(
        &self,
        s: &mut Session,
        tools: &[ToolDefinition],
    ) -> Result<ProviderResponse, ProviderError> {
        let report = s.state.report.render();
        let request = ProviderRequest {
            model: self.router.next_model().to_string(),
            messages: build_messages(
                SYSTEM_PROMPT,
                s.state.question(),
                &report,
                &s.state.observation,
                s.state.remaining_budget(),
            ),
            temperature: self.config.model.temperature,
            max_tokens: Some(self.config.model.max_tokens),
            tools: tools.to_vec(),
        };

        debug!(
            model = %request.model,
            estimated_tokens =
                estimate_messages_tokens(&request.messages) + estimate_tools_tokens(tools),
            "Model request"
        );

        let timeout = Duration::from_secs(self.config.agent.call_timeout_secs);
        let provider = &self.provider;
        let request = &request;
        let mut span = Span::new(SpanKind::ModelCall, request.model.as_str());
        let (result, attempts) = self
            .retry
            .run(
                || async move {
                    tokio::time::timeout(timeout, provider.complete(request.clone()))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ProviderError::Timeout(format!(
                                "no model response within {}s",
                                timeout.as_secs()
                            )))
                        })
                },
                ProviderError::is_transient,
            )
            .await;
        s.model_calls += attempts;

        match &result {
            Ok(response) => {
                if let Some(usage) = &response.usage {
                    span = span.with_tokens(usage.total_tokens);
                }
                span.end(true);
                debug!(
                    model = %response.model,
                    tool_calls = response.tool_calls.len(),
                    attempts,
                    "Model responded"
                );
            }
            Err(e) => {
                span.end(false);
                warn!(model = %request.model, error = %e, attempts, "Model call failed");
            }
        }
        self.record_span(s, span);
        result
    }

    // ── Dispatch ──

    /// Execute the parsed items in order. The flag is set when the tool-call
    /// budget refused a call.
    async fn dispatch(
        &self,
        s: &mut Session,
        items: Vec<ParsedItem>,
        deadline: Instant,
    ) -> Result<(Vec<Observation>, bool), Error> {
        let mut observations = Vec::new();
        let mut executing = false;

        for step in plan_steps(items) {
            match step {
                Step::Failure(failure) => {
                    debug!(call_id = %failure.call_id, reason = %failure.reason, "Unparsable tool call");
                    let tool = failure.tool_name.clone().unwrap_or_else(|| "unknown".into());
                    observations.push(Observation::failure(
                        &failure.call_id,
                        tool,
                        failure.message(),
                        ErrorKind::Parse,
                    ));
                }
                Step::Call(call) => {
                    if !s.state.try_consume_tool_call() {
                        observations.push(self.budget_refusal(&call));
                        return Ok((observations, true));
                    }
                    if !executing {
                        self.transition(s, LoopState::Execute)?;
                        executing = true;
                    }
                    observations.push(self.execute_call(s, &call, deadline).await);
                }
                Step::Delegates(calls) => {
                    let mut admitted = Vec::with_capacity(calls.len());
                    let mut refused = Vec::new();
                    for call in calls {
                        if s.state.try_consume_tool_call() {
                            admitted.push(call);
                        } else {
                            refused.push(self.budget_refusal(&call));
                        }
                    }
                    if !admitted.is_empty() {
                        if !executing {
                            self.transition(s, LoopState::Execute)?;
                            executing = true;
                        }
                        observations.extend(self.run_delegates(s, admitted).await);
                    }
                    if !refused.is_empty() {
                        observations.extend(refused);
                        return Ok((observations, true));
                    }
                }
            }
        }
        Ok((observations, false))
    }

    fn budget_refusal(&self, call: &ToolCall) -> Observation {
        warn!(tool = %call.tool_name, call_id = %call.call_id, "Tool-call budget exhausted");
        Observation::failure(
            &call.call_id,
            &call.tool_name,
            format!(
                "Tool-call budget of {} exhausted; call not executed.",
                self.config.agent.max_tool_calls
            ),
            ErrorKind::BudgetExhausted,
        )
    }

    fn call_timeout(&self, tool: &str) -> Duration {
        let base = Duration::from_secs(self.config.agent.call_timeout_secs);
        if tool == "run_sandbox" {
            base.max(Duration::from_secs(self.config.sandbox.timeout_secs)) + SANDBOX_GRACE
        } else {
            base
        }
    }

    async fn execute_call(&self, s: &Session, call: &ToolCall, deadline: Instant) -> Observation {
        let started = Instant::now();
        let (observation, attempts) = match call.tool_name.as_str() {
            SCAN_PROJECT_TOOL if self.config.tools.is_enabled(SCAN_PROJECT_TOOL) => {
                (self.scan(s, call, deadline).await, 1)
            }
            _ => self.run_registry_tool(s, call).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            tool = %call.tool_name,
            call_id = %call.call_id,
            success = observation.success,
            attempts,
            duration_ms,
            "Tool executed"
        );
        self.emit(DomainEvent::ToolExecuted {
            tool_name: call.tool_name.clone(),
            success: observation.success,
            attempts,
            duration_ms,
            timestamp: Utc::now(),
        });
        let mut span = Span::new(SpanKind::ToolExecution, call.tool_name.as_str());
        span.end(observation.success);
        self.record_span(s, span);
        observation
    }

    /// Run a registered tool with retries. Cache hits report zero attempts.
    async fn run_registry_tool(&self, s: &Session, call: &ToolCall) -> (Observation, u32) {
        let Some(tool) = self.registry.get(&call.tool_name) else {
            let available: Vec<String> =
                self.tool_definitions().into_iter().map(|d| d.name).collect();
            let message = format!(
                "Unknown tool '{}'. Available tools: {}",
                call.tool_name,
                available.join(", ")
            );
            return (
                Observation::failure(
                    &call.call_id,
                    &call.tool_name,
                    message,
                    ErrorKind::ToolPermanent,
                ),
                0,
            );
        };

        let parameters = normalize_parameters(&call.parameters, &tool.parameters_schema());
        let memo_input = tool
            .cacheable()
            .then(|| memo_input(&s.id, &call.tool_name, &parameters));
        if let (Some(store), Some(input)) = (&self.store, &memo_input)
            && let Some(result) = self.cached_result(store.as_ref(), input).await
        {
            debug!(tool = %call.tool_name, call_id = %call.call_id, "Tool result served from CAS");
            return (result.into_observation(call), 0);
        }

        let timeout = self.call_timeout(&call.tool_name);
        let tool = &tool;
        let parameters = &parameters;
        let (result, attempts) = self
            .retry
            .run(
                || async move {
                    tokio::time::timeout(timeout, tool.execute(parameters))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ToolError::Timeout {
                                tool_name: call.tool_name.clone(),
                                timeout_secs: timeout.as_secs(),
                            })
                        })
                },
                ToolError::is_transient,
            )
            .await;

        match result {
            Ok(result) => {
                if result.success
                    && let (Some(store), Some(input)) = (&self.store, &memo_input)
                {
                    self.memoize(store.as_ref(), &call.tool_name, input, &result).await;
                }
                (result.into_observation(call), attempts)
            }
            Err(e) => {
                let message = format!("Tool '{}' failed: {e}", call.tool_name);
                (
                    Observation::failure(&call.call_id, &call.tool_name, message, e.kind()),
                    attempts,
                )
            }
        }
    }

    async fn cached_result(&self, store: &dyn ContentStore, input: &[u8]) -> Option<ToolResult> {
        match store.lookup(input, &self.config.cas.parser_version).await {
            Ok(Some(entry)) => match serde_json::from_slice(&entry.blob) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(error = %e, "Cached tool result unreadable, re-running");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "CAS lookup failed");
                None
            }
        }
    }

    async fn memoize(&self, store: &dyn ContentStore, tool: &str, input: &[u8], result: &ToolResult) {
        let blob = match serde_json::to_vec(result) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(tool, error = %e, "Failed to encode tool result");
                return;
            }
        };
        let metadata = CasMetadata::new("application/json").with_source(tool);
        if let Err(e) = store
            .memoize(input, &self.config.cas.parser_version, &blob, metadata)
            .await
        {
            warn!(tool, error = %e, "Failed to memoize tool result");
        }
    }

    async fn scan(&self, s: &Session, call: &ToolCall, deadline: Instant) -> Observation {
        let Some(query) = call
            .str_param("query")
            .or_else(|| call.str_param("input"))
            .filter(|q| !q.trim().is_empty())
        else {
            return Observation::failure(
                &call.call_id,
                &call.tool_name,
                "scan_project needs a non-empty 'query' parameter",
                ErrorKind::ToolPermanent,
            );
        };
        let call_deadline = deadline.min(Instant::now() + self.call_timeout(SCAN_PROJECT_TOOL));
        let outcome = self.planner.scan(query, s.params.concurrency, Some(call_deadline)).await;
        for stage in &outcome.stages {
            let mut span = Span::new(SpanKind::PlannerStage, stage.tier.to_string());
            span.end(!stage.cancelled);
            self.record_span(s, span);
        }
        outcome.into_observation(call, MAX_RENDERED_HITS)
    }

    // ── Delegation ──

    /// Fan a batch of delegate calls out under `max_parallel`. Results come
    /// back in completion order, ties broken by ascending call id.
    async fn run_delegates(&self, s: &Session, calls: Vec<ToolCall>) -> Vec<Observation> {
        let pool = Semaphore::new(self.config.delegation.max_parallel.max(1));
        let pool = &pool;
        let mut running: FuturesUnordered<_> = calls
            .iter()
            .map(|call| async move {
                let _permit = pool.acquire().await.ok();
                let observation = self.delegate_call(s, call).await;
                (Instant::now(), call.call_id.as_str(), observation)
            })
            .collect();

        let mut done = Vec::with_capacity(calls.len());
        while let Some(result) = running.next().await {
            done.push(result);
        }
        drop(running);
        done.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        done.into_iter().map(|(_, _, observation)| observation).collect()
    }

    async fn delegate_call(&self, s: &Session, call: &ToolCall) -> Observation {
        let started = Instant::now();
        let agent = call.str_param("agent").unwrap_or_default().trim();
        let task = call
            .str_param("task")
            .or_else(|| call.str_param("input"))
            .unwrap_or_default()
            .trim();
        if agent.is_empty() || task.is_empty() {
            return Observation::failure(
                &call.call_id,
                DELEGATE_TOOL,
                "delegate needs an 'agent' and a 'task'",
                ErrorKind::ToolPermanent,
            );
        }

        let decision = s.policy.decide(agent, estimate_tokens(task) as u32);
        self.emit(DomainEvent::DelegationDecided {
            agent: agent.to_string(),
            allowed: decision.is_ok(),
            reason: decision.err().map(|r| r.as_str().to_string()),
            timestamp: Utc::now(),
        });
        if let Err(reason) = decision {
            let kind = match reason {
                DenyReason::UnknownAgent => ErrorKind::ToolPermanent,
                DenyReason::BudgetExhausted | DenyReason::TokenCapExceeded => ErrorKind::BudgetExhausted,
            };
            return Observation::failure(
                &call.call_id,
                DELEGATE_TOOL,
                format!("Delegation to '{agent}' denied ({reason}); continue without it."),
                kind,
            );
        }

        let (max_tokens, model) = s
            .policy
            .budget(agent)
            .map(|b| (b.tokens_per_call, b.model.clone()))
            .unwrap_or_default();
        let timeout = self.call_timeout(DELEGATE_TOOL);
        let delegate = &self.delegate;
        let model = model.as_deref();
        let mut span = Span::new(SpanKind::Delegation, agent);
        let (result, attempts) = self
            .retry
            .run(
                || async move {
                    tokio::time::timeout(timeout, delegate.run(agent, task, max_tokens, model))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ProviderError::Timeout(format!(
                                "delegate '{agent}' did not answer within {}s",
                                timeout.as_secs()
                            )))
                        })
                },
                ProviderError::is_transient,
            )
            .await;

        let observation = match result {
            Ok(text) => {
                let compressed = s.policy.compress(agent, &text);
                span = span.with_tokens(estimate_tokens(&compressed) as u32);
                Observation {
                    call_id: call.call_id.clone(),
                    tool_name: DELEGATE_TOOL.into(),
                    raw_output: format!("[{agent}] {compressed}"),
                    citations: Vec::new(),
                    success: true,
                    error_kind: None,
                }
            }
            Err(e) => {
                warn!(agent, error = %e, attempts, "Delegate failed");
                let kind = if e.is_transient() {
                    ErrorKind::ToolTransient
                } else {
                    ErrorKind::ToolPermanent
                };
                Observation::failure(
                    &call.call_id,
                    DELEGATE_TOOL,
                    format!("Delegate '{agent}' failed: {e}"),
                    kind,
                )
            }
        };
        span.end(observation.success);
        self.record_span(s, span);
        self.emit(DomainEvent::ToolExecuted {
            tool_name: DELEGATE_TOOL.into(),
            success: observation.success,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        observation
    }

    // ── Observe / verify / compress ──

    fn observe(&self, s: &mut Session, turn: u32, observations: &[Observation]) {
        let mut fresh = 0usize;
        for obs in observations {
            for citation in &obs.citations {
                if s.log.append(turn, &obs.call_id, &obs.tool_name, citation.clone()).1 {
                    fresh += 1;
                }
            }
        }
        debug!(
            turn,
            observations = observations.len(),
            new_evidence = fresh,
            evidence_total = s.log.len(),
            "Observations recorded"
        );
    }

    async fn verify(&self, s: &Session, turn: u32, observations: &[Observation]) -> GateOutput {
        let claims: Vec<Claim> = observations.iter().filter_map(claim_from_observation).collect();
        let mut span = Span::new(SpanKind::Verification, format!("turn {turn}"));
        let output = s.gate.review(claims).await;
        self.emit(DomainEvent::ClaimsVerified {
            turn,
            accepted: output.accepted.len(),
            rejected: output.rejected.len(),
            timestamp: Utc::now(),
        });
        span.end(true);
        self.record_span(s, span);
        output
    }

    fn compress(&self, s: &mut Session, turn: u32, verdicts: GateOutput, observations: &[Observation]) {
        let previous = s.state.report.render();

        for claim in verdicts.accepted {
            s.state.report.push_claim(&claim, turn);
            s.claims.push(claim);
        }
        for (claim, reason) in verdicts.rejected {
            debug!(turn, reason = %reason, claim = %claim.text, "Claim not verified");
            if claim.status == VerificationStatus::Unverified && self.config.agent.retain_unverified {
                s.state.report.push_claim(&claim, turn);
                s.claims.push(claim);
            }
        }

        let ratio = s.params.compression_ratio;
        s.state
            .report
            .push_note(compress_summary(&observation_summary(observations), ratio), turn);
        let evicted = s.state.report.enforce_cap();

        let tick = self.drift.measure(turn, &previous, &s.state.report.render());
        let next = self.drift.apply(&tick, s.params);
        info!(
            turn,
            similarity = tick.similarity,
            recommendation = %tick.recommendation,
            compression_ratio = next.compression_ratio,
            verify_k = next.verify_k,
            concurrency = next.concurrency,
            "Drift tick"
        );
        self.emit(DomainEvent::DriftMeasured {
            turn,
            similarity: tick.similarity,
            recommendation: tick.recommendation.to_string(),
            compression_ratio: next.compression_ratio,
            verify_k: next.verify_k,
            timestamp: Utc::now(),
        });
        s.params = next;
        s.gate.set_verify_k(next.verify_k);
        s.drift.push(DriftRecord { tick, params: next });

        s.state.observation =
            observation_context(observations, ratio, self.config.agent.observation_cap_tokens);
        debug!(
            turn,
            report_tokens = s.state.report.tokens(),
            report_entries = s.state.report.len(),
            evicted,
            "Report compressed"
        );
    }

    // ── Finalization ──

    async fn finalize(&self, s: &mut Session, turn: u32, answer: &str) -> Result<Ending, Error> {
        let cited = answer_claims(answer, &s.log);
        let mut flagged = Vec::new();
        for item in &cited {
            let verdict = s.gate.review(vec![item.claim.clone()]).await;
            if verdict.accepted.is_empty() {
                flagged.push(item.span);
            }
        }
        self.emit(DomainEvent::ClaimsVerified {
            turn,
            accepted: cited.len() - flagged.len(),
            rejected: flagged.len(),
            timestamp: Utc::now(),
        });
        flagged.extend(uncited_assertions(answer));
        let annotated = annotate_answer(answer, &flagged);

        let contradictions = find_contradictions(&s.claims);
        let failures = completion_checklist(s.state.question(), &annotated, &contradictions);
        if failures.is_empty() {
            self.transition(s, LoopState::Answered)?;
            return Ok(Ending::Answered(annotated));
        }
        for failure in &failures {
            warn!(session = %s.id, failure = %failure, "Completion checklist failed");
        }
        Ok(Ending::Incomplete(failures.iter().map(ToString::to_string).collect()))
    }

    fn finish(&self, mut s: Session, ending: Ending, started: Instant) -> FinalResult {
        if !s.state.state().is_terminal()
            && let Err(e) = self.transition(&mut s, LoopState::Incomplete)
        {
            warn!(session = %s.id, error = %e, "Could not mark session incomplete");
        }

        let answered = matches!(ending, Ending::Answered(_));
        let stats = SessionStats {
            session_id: s.id.to_string(),
            turns: s.state.turn_count,
            tool_calls: s.state.tool_call_count(),
            model_calls: s.model_calls,
            drift: s.drift,
            delegation: s.policy.usage(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.emit(DomainEvent::SessionFinished {
            session_id: stats.session_id.clone(),
            answered,
            turns: stats.turns,
            tool_calls: stats.tool_calls,
            timestamp: Utc::now(),
        });
        if let (Some(telemetry), Some(trace_id)) = (&self.telemetry, &s.trace_id)
            && let Err(e) = telemetry.end_trace(trace_id)
        {
            debug!(error = %e, "Trace not closed");
        }
        info!(
            session = %stats.session_id,
            answered,
            turns = stats.turns,
            tool_calls = stats.tool_calls,
            model_calls = stats.model_calls,
            duration_ms = stats.duration_ms,
            "Research session finished"
        );

        let outcome = match ending {
            Ending::Answered(answer) => Outcome::Answered {
                answer,
                report: s.state.report,
                evidence_log: s.log.records().to_vec(),
            },
            Ending::Incomplete(unresolved_gaps) => Outcome::Incomplete {
                partial_report: s.state.report,
                unresolved_gaps,
            },
        };
        FinalResult { outcome, stats }
    }

    // ── Plumbing ──

    fn transition(&self, s: &mut Session, next: LoopState) -> Result<(), Error> {
        let from = s.state.transition(next)?;
        debug!(session = %s.id, from = %from, to = %next, "State transition");
        self.emit(DomainEvent::StateChanged {
            session_id: s.id.to_string(),
            from: from.to_string(),
            to: next.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn record_span(&self, s: &Session, span: Span) {
        if let (Some(telemetry), Some(trace_id)) = (&self.telemetry, &s.trace_id)
            && let Err(e) = telemetry.record_span(trace_id, span)
        {
            debug!(error = %e, "Span not recorded");
        }
    }
}

/// Registry schemas plus the tools the loop handles itself, in name order.
pub fn offered_tools(registry: &ToolRegistry, config: &AppConfig) -> Vec<ToolDefinition> {
    let mut defs = registry.definitions();
    if config.tools.is_enabled(SCAN_PROJECT_TOOL) {
        defs.push(scan_project_definition());
    }
    if config.tools.is_enabled(DELEGATE_TOOL) && !config.delegation.agents.is_empty() {
        let agents: Vec<&str> = config.delegation.agents.keys().map(String::as_str).collect();
        defs.push(delegate_definition(&agents));
    }
    defs.sort_by(|a, b| a.name.cmp(&b.name));
    defs
}

/// A lone string `input` (what free-text actions produce) is renamed to the
/// tool's first required parameter.
fn normalize_parameters(parameters: &Parameters, schema: &Value) -> Parameters {
    let mut parameters = parameters.clone();
    if parameters.len() == 1
        && matches!(parameters.get("input"), Some(Value::String(_)))
        && let Some(first) = schema["required"].get(0).and_then(Value::as_str)
        && first != "input"
        && let Some(value) = parameters.remove("input")
    {
        parameters.insert(first.to_string(), value);
    }
    parameters
}

/// Memo key input for a tool call. Scoped to the session.
fn memo_input(session: &SessionId, tool: &str, parameters: &Parameters) -> Vec<u8> {
    let params = serde_json::to_string(parameters).unwrap_or_default();
    format!("{session}\n{tool}\n{params}").into_bytes()
}

fn status_label(obs: &Observation) -> String {
    match (obs.success, obs.error_kind) {
        (true, _) => "ok".to_string(),
        (false, Some(kind)) => format!("failed ({kind})"),
        (false, None) => "failed".to_string(),
    }
}

/// One line per observation for the report note.
fn observation_summary(observations: &[Observation]) -> String {
    observations
        .iter()
        .map(|obs| {
            let headline = obs
                .raw_output
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default();
            let headline: String = headline.chars().take(HEADLINE_CHARS).collect();
            format!("{} {}: {headline}", obs.tool_name, status_label(obs))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// O_t: every observation compressed by `ratio`, then capped as a whole.
fn observation_context(observations: &[Observation], ratio: f64, cap_tokens: usize) -> String {
    let body = observations
        .iter()
        .map(|obs| {
            format!(
                "[{}] {} {}\n{}",
                obs.call_id,
                obs.tool_name,
                status_label(obs),
                compress_summary(obs.raw_output.trim(), ratio)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let capped = truncate_to_tokens(&body, cap_tokens);
    if capped.len() < body.len() {
        format!("{capped}{ELLIPSIS}")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::EntryKind;
    use crate::test_helpers::{ScriptedProvider, text, tool_call, tool_calls};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use veritas_cas::MemoryStore;
    use veritas_config::AgentBudgetConfig;
    use veritas_tools::build_toolkit;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn config() -> AppConfig {
        AppConfig::default()
    }

    fn orchestrator(root: &Path, provider: Arc<ScriptedProvider>, config: &AppConfig) -> Orchestrator {
        let store: Arc<dyn ContentStore> = Arc::new(MemoryStore::new());
        let toolkit = build_toolkit(config, root, store.clone(), None).unwrap();
        Orchestrator::new(provider, toolkit, config)
            .with_store(store)
            .with_validator(ValidatorChoice::ExplicitlyDisabled)
            .with_retry(RetryPolicy::none())
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/policy.rs",
            "pub struct RetryPolicy {\n    pub max_retries: u32,\n}\n",
        );
        write(
            dir.path(),
            "src/main.rs",
            "fn main() {\n    let p = RetryPolicy { max_retries: 3 };\n}\n",
        );
        dir
    }

    struct EchoDelegate;

    #[async_trait]
    impl Delegate for EchoDelegate {
        async fn run(
            &self,
            agent: &str,
            task: &str,
            _max_tokens: u32,
            _model: Option<&str>,
        ) -> Result<String, ProviderError> {
            Ok(format!("{agent} handled: {task}"))
        }
    }

    #[test]
    fn delegate_runs_are_grouped() {
        let call = |id: &str, tool: &str| ParsedItem::Call(ToolCall::new(id, tool, Parameters::new()));
        let steps = plan_steps(vec![
            call("a", DELEGATE_TOOL),
            call("b", DELEGATE_TOOL),
            call("c", "search_code"),
            call("d", DELEGATE_TOOL),
        ]);
        assert_eq!(steps.len(), 3);
        assert!(matches!(&steps[0], Step::Delegates(batch) if batch.len() == 2));
        assert!(matches!(&steps[1], Step::Call(c) if c.call_id == "c"));
        assert!(matches!(&steps[2], Step::Delegates(batch) if batch.len() == 1));
    }

    #[test]
    fn lone_input_is_renamed_to_first_required() {
        let schema = json!({"required": ["query"]});
        let params = json!({"input": "retry"}).as_object().cloned().unwrap();
        let normalized = normalize_parameters(&params, &schema);
        assert_eq!(normalized.get("query"), Some(&json!("retry")));
        assert!(!normalized.contains_key("input"));

        let mixed = json!({"input": "x", "path": "src"}).as_object().cloned().unwrap();
        assert_eq!(normalize_parameters(&mixed, &schema), mixed);
    }

    #[tokio::test]
    async fn direct_answer_needs_no_tools() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::texts(&[
            "Final Answer: Paris is the capital of France.",
        ]));
        let orch = orchestrator(dir.path(), provider.clone(), &config());
        let result = orch.run("What is the capital of France?").await;

        assert!(result.is_answered());
        assert_eq!(result.answer(), Some("Paris is the capital of France. [unverified]"));
        assert_eq!(result.stats.tool_calls, 0);
        assert_eq!(result.stats.model_calls, 1);
        assert!(result.outcome.report().is_empty());

        let requests = provider.requests();
        assert_eq!(requests[0].messages.len(), 2);
        let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["delegate", "read_file", "run_sandbox", "scan_project", "search_code"]
        );
    }

    #[tokio::test]
    async fn single_citation_stays_unverified() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![
            tool_call(
                "call_1",
                "read_file",
                json!({"path": "src/policy.rs", "start_line": 1, "end_line": 2}),
            ),
            text("Final Answer: RetryPolicy holds a retry count (src/policy.rs:1-2)."),
        ]));
        let orch = orchestrator(dir.path(), provider.clone(), &config());
        let result = orch.run("What does RetryPolicy hold?").await;

        assert!(result.is_answered(), "gaps: {:?}", result.gaps());
        assert!(result.answer().unwrap().contains("[unverified]"));
        let report = result.outcome.report();
        assert_eq!(report.verified().count(), 0);
        assert!(report.entries().iter().any(|e| e.kind == EntryKind::Unverified));
        assert_eq!(result.stats.tool_calls, 1);
    }

    #[tokio::test]
    async fn definition_and_usage_verify_a_claim() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![
            tool_call("call_1", "search_code", json!({"query": "RetryPolicy"})),
            text(
                "Final Answer: RetryPolicy is defined at src/policy.rs:1 and constructed at src/main.rs:2.",
            ),
        ]));
        let orch = orchestrator(dir.path(), provider.clone(), &config());
        let result = orch.run("Where is RetryPolicy defined and used?").await;

        assert!(result.is_answered(), "gaps: {:?}", result.gaps());
        assert!(!result.answer().unwrap().contains("[unverified]"));
        assert_eq!(result.outcome.report().verified().count(), 1);
        match &result.outcome {
            Outcome::Answered { evidence_log, .. } => assert!(evidence_log.len() >= 2),
            other => panic!("unexpected outcome {other:?}"),
        }

        // Turn two sees the report and the observation, never the raw history.
        let requests = provider.requests();
        let second = &requests[1];
        assert_eq!(second.messages.len(), 4);
        assert!(second.messages[2].content.contains("[verified]"));
        assert!(second.messages[3].content.contains("src/policy.rs:1"));
    }

    #[tokio::test]
    async fn parse_failure_is_fed_back() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::texts(&[
            r#"{"tool": "read_file", "parameters": {"path": "a.rs" "start_line" 3}}"#,
            "Final Answer: The parser recovered and the session completed normally.",
        ]));
        let orch = orchestrator(dir.path(), provider.clone(), &config());
        let result = orch.run("Does the loop survive bad JSON?").await;

        assert!(result.is_answered());
        assert_eq!(result.stats.tool_calls, 0);
        let requests = provider.requests();
        let second = &requests[1];
        let observation = &second.messages.last().unwrap().content;
        assert!(observation.contains("failed (parse_error)"), "{observation}");
    }

    #[tokio::test]
    async fn tool_budget_ends_incomplete() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![tool_calls(&[
            ("call_1", "search_code", json!({"query": "RetryPolicy"})),
            ("call_2", "read_file", json!({"path": "src/main.rs"})),
        ])]));
        let mut cfg = config();
        cfg.agent.max_tool_calls = 1;
        let orch = orchestrator(dir.path(), provider, &cfg);
        let result = orch.run("Where is RetryPolicy used?").await;

        assert!(!result.is_answered());
        assert_eq!(result.stats.tool_calls, 1);
        assert!(result.gaps()[0].contains("tool-call budget of 1"));
        assert!(!result.outcome.report().is_empty());
    }

    #[tokio::test]
    async fn exhausted_delegate_budget_is_not_fatal() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![
            tool_calls(&[
                ("call_1", DELEGATE_TOOL, json!({"agent": "summarizer", "task": "summarize a"})),
                ("call_2", DELEGATE_TOOL, json!({"agent": "summarizer", "task": "summarize b"})),
            ]),
            text("Final Answer: Summaries were partially available; one delegate call was denied."),
        ]));
        let mut cfg = config();
        cfg.delegation.agents.insert(
            "summarizer".into(),
            AgentBudgetConfig {
                max_calls: 1,
                tokens_per_call: 1200,
                model: None,
            },
        );
        let telemetry = Arc::new(TelemetryEngine::new());
        let orch = orchestrator(dir.path(), provider.clone(), &cfg)
            .with_delegate(Arc::new(EchoDelegate))
            .with_telemetry(telemetry.clone());
        let result = orch.run("Summarize the project").await;

        assert!(result.is_answered(), "gaps: {:?}", result.gaps());
        assert_eq!(result.stats.delegation.get("summarizer"), Some(&1));
        assert_eq!(telemetry.metrics().get("calls.summarizer"), 1);
        assert_eq!(telemetry.metrics().get("deny.summarizer.budget_exhausted"), 1);

        let requests = provider.requests();
        let observation = &requests[1].messages.last().unwrap().content;
        assert!(observation.contains("summarizer handled: summarize a"));
        assert!(observation.contains("budget_exhausted"));
    }

    #[tokio::test]
    async fn model_failure_ends_incomplete() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let orch = orchestrator(dir.path(), provider, &config());
        let result = orch.run("anything").await;
        assert!(!result.is_answered());
        assert!(result.gaps()[0].starts_with("model call failed"));
    }

    #[tokio::test]
    async fn turn_limit_ends_incomplete() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![
            tool_call("c1", "search_code", json!({"query": "RetryPolicy"})),
            tool_call("c2", "search_code", json!({"query": "max_retries"})),
            tool_call("c3", "search_code", json!({"query": "main"})),
        ]));
        let mut cfg = config();
        cfg.agent.max_turns = 2;
        let orch = orchestrator(dir.path(), provider.clone(), &cfg);
        let result = orch.run("Keep searching").await;
        assert!(!result.is_answered());
        assert_eq!(result.stats.turns, 2);
        assert_eq!(provider.call_count(), 2);
        assert!(result.gaps()[0].contains("turn limit of 2"));
    }

    #[tokio::test]
    async fn drift_tick_every_turn_and_baseline_is_stable() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![
            tool_call("c1", "search_code", json!({"query": "RetryPolicy"})),
            tool_call("c2", "read_file", json!({"path": "src/main.rs"})),
            text("Final Answer: RetryPolicy is defined at src/policy.rs:1 and used at src/main.rs:2."),
        ]));
        let orch = orchestrator(dir.path(), provider, &config());
        let result = orch.run("Where is RetryPolicy?").await;

        let drift = &result.stats.drift;
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].tick.turn, 1);
        assert_eq!(drift[0].params.compression_ratio, 0.3);
        assert!(drift[1].params.compression_ratio >= drift[0].params.compression_ratio);
    }

    #[tokio::test]
    async fn repeated_calls_are_served_from_cas() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::responses(vec![
            tool_call("c1", "read_file", json!({"path": "src/main.rs"})),
            tool_call("c2", "read_file", json!({"path": "src/main.rs"})),
            text("Final Answer: main constructs a RetryPolicy with three retries."),
        ]));
        let bus = Arc::new(EventBus::new(256));
        let mut events = bus.subscribe();
        let orch = orchestrator(dir.path(), provider, &config()).with_event_bus(bus);
        let result = orch.run("What does main do?").await;
        assert!(result.is_answered());

        let mut attempts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::ToolExecuted { attempts: a, .. } = event.as_ref() {
                attempts.push(*a);
            }
        }
        assert_eq!(attempts, vec![1, 0]);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::texts(&["Final Answer: nothing to look up here at all."]));
        let bus = Arc::new(EventBus::new(64));
        let mut events = bus.subscribe();
        let orch = orchestrator(dir.path(), provider, &config()).with_event_bus(bus);
        orch.run("trivial question").await;

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::StateChanged { from, to, .. } = event.as_ref() {
                transitions.push(format!("{from}->{to}"));
            }
        }
        assert_eq!(transitions, vec!["PLANNING->VERIFY", "VERIFY->ANSWERED"]);
    }

    #[tokio::test]
    async fn empty_answer_fails_the_checklist() {
        let dir = fixture();
        let provider = Arc::new(ScriptedProvider::texts(&["   "]));
        let orch = orchestrator(dir.path(), provider, &config());
        let result = orch.run("Where is RetryPolicy?").await;
        assert!(!result.is_answered());
        assert!(result.gaps()[0].contains("does not address"));
    }

    struct Stalling;

    #[async_trait]
    impl Provider for Stalling {
        fn name(&self) -> &str {
            "stalling"
        }
        async fn complete(&self, _r: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Timeout("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_timeout_ends_incomplete() {
        let dir = fixture();
        let mut cfg = config();
        cfg.agent.session_timeout_secs = 5;
        let store: Arc<dyn ContentStore> = Arc::new(MemoryStore::new());
        let toolkit = build_toolkit(&cfg, dir.path(), store, None).unwrap();
        let orch = Orchestrator::new(Arc::new(Stalling), toolkit, &cfg)
            .with_validator(ValidatorChoice::ExplicitlyDisabled);
        let result = orch.run("anything").await;
        assert!(!result.is_answered());
        assert!(result.gaps()[0].contains("session timeout of 5s"));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = Outcome::Incomplete {
            partial_report: Report::new(100),
            unresolved_gaps: vec!["gap".into()],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "INCOMPLETE");
        assert_eq!(json["unresolved_gaps"][0], "gap");
    }
}
