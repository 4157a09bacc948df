//! Verifier gate: admits claims into R_t only when they are evidence-backed.
//!
//! The admission rule is structural: at least `verify_k` (never below 2)
//! citations from independent files or domains, or a definition site paired
//! with a usage site of the same symbol. Claims that pass may then go to a
//! [`ClaimValidator`] for an entailment check. Without a validator, or when
//! the validator errors, the structural rule alone decides, which keeps the
//! fallback deterministic.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use veritas_config::ValidatorSetting;
use veritas_core::error::ProviderError;
use veritas_core::evidence::{Claim, VerificationStatus};
use veritas_core::message::Message;
use veritas_core::provider::{Provider, ProviderRequest};
use veritas_tools::query_terms;
use crate::claims::{Contradiction, unmarked_assertions};

/// Floor for the independent-citation requirement.
pub const MIN_VERIFY_K: usize = 2;

const VALIDATOR_SYSTEM_PROMPT: &str =
    "You are an evidence verification assistant. Always respond with only YES or NO.";
const SNIPPET_CHARS: usize = 300;

/// An entailment check for a claim against its cited snippets.
#[async_trait]
pub trait ClaimValidator: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(true)` when the snippets support the claim.
    async fn confirm(&self, claim: &Claim) -> Result<bool, ProviderError>;
}

/// Which validator the gate consults.
///
/// `UseDefault` means "whatever the session provides" and may end up with
/// none; `ExplicitlyDisabled` never consults one.
#[derive(Clone)]
pub enum ValidatorChoice {
    UseDefault,
    ExplicitlyDisabled,
    Validator(Arc<dyn ClaimValidator>),
}

impl From<ValidatorSetting> for ValidatorChoice {
    fn from(setting: ValidatorSetting) -> Self {
        match setting {
            ValidatorSetting::Default => Self::UseDefault,
            ValidatorSetting::Disabled => Self::ExplicitlyDisabled,
        }
    }
}

impl std::fmt::Debug for ValidatorChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseDefault => f.write_str("UseDefault"),
            Self::ExplicitlyDisabled => f.write_str("ExplicitlyDisabled"),
            Self::Validator(v) => write!(f, "Validator({})", v.name()),
        }
    }
}

// ── Model validator ───────────────────────────────────────────────────────

/// Asks a model a YES/NO entailment question.
pub struct ModelValidator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl ModelValidator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }

    fn prompt(claim: &Claim) -> String {
        let sources = claim
            .supporting_evidence
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let snippet: String = e.snippet.chars().take(SNIPPET_CHARS).collect();
                format!("[{}] {}: {}", i + 1, e.location, snippet)
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You must respond with ONLY the word YES or ONLY the word NO.\n\nClaim: {}\nSources:\n{sources}\n\nIs this claim supported by the sources? Respond with ONLY YES or NO.",
            claim.text
        )
    }
}

#[async_trait]
impl ClaimValidator for ModelValidator {
    fn name(&self) -> &str {
        "model"
    }

    async fn confirm(&self, claim: &Claim) -> Result<bool, ProviderError> {
        let mut request = ProviderRequest::plain(
            &self.model,
            vec![
                Message::system(VALIDATOR_SYSTEM_PROMPT),
                Message::user(Self::prompt(claim)),
            ],
            self.temperature,
        );
        request.max_tokens = Some(5);
        let response = self.provider.complete(request).await?;
        let verdict = response.content.trim().to_uppercase();
        Ok(matches!(verdict.as_str(), "YES" | "YES." | "YES!"))
    }
}

// ── Gate ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NoEvidence,
    InsufficientEvidence { independent: usize, required: usize },
    ValidatorDeclined { validator: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEvidence => f.write_str("no supporting evidence"),
            Self::InsufficientEvidence {
                independent,
                required,
            } => write!(
                f,
                "{independent} independent source(s), {required} required and no definition/usage pair"
            ),
            Self::ValidatorDeclined { validator } => {
                write!(f, "{validator} validator did not confirm the claim")
            }
        }
    }
}

/// Result of one gate pass.
#[derive(Debug, Default)]
pub struct GateOutput {
    pub accepted: Vec<Claim>,
    pub rejected: Vec<(Claim, RejectReason)>,
}

pub struct VerifierGate {
    choice: ValidatorChoice,
    validator: Option<Arc<dyn ClaimValidator>>,
    verify_k: usize,
}

impl VerifierGate {
    pub fn new(choice: ValidatorChoice, verify_k: usize) -> Self {
        let validator = match &choice {
            ValidatorChoice::Validator(v) => Some(v.clone()),
            ValidatorChoice::UseDefault | ValidatorChoice::ExplicitlyDisabled => None,
        };
        Self {
            choice,
            validator,
            verify_k: verify_k.max(MIN_VERIFY_K),
        }
    }

    /// Supply the session's default validator. Only takes effect for
    /// [`ValidatorChoice::UseDefault`].
    pub fn with_default_validator(mut self, validator: Arc<dyn ClaimValidator>) -> Self {
        if matches!(self.choice, ValidatorChoice::UseDefault) {
            self.validator = Some(validator);
        }
        self
    }

    pub fn validator_name(&self) -> Option<&str> {
        self.validator.as_deref().map(|v| v.name())
    }

    pub fn verify_k(&self) -> usize {
        self.verify_k
    }

    pub fn set_verify_k(&mut self, k: usize) {
        self.verify_k = k.max(MIN_VERIFY_K);
    }

    /// The structural admission rule. Deterministic.
    pub fn check_evidence(&self, claim: &Claim) -> Result<(), RejectReason> {
        if claim.supporting_evidence.is_empty() {
            return Err(RejectReason::NoEvidence);
        }
        let independent = claim.independent_sources();
        if independent >= self.verify_k || claim.has_definition_usage_pair() {
            return Ok(());
        }
        Err(RejectReason::InsufficientEvidence {
            independent,
            required: self.verify_k,
        })
    }

    /// Review a batch. Structural failures come back `Unverified`; claims a
    /// validator declines come back `Rejected`.
    pub async fn review(&self, claims: Vec<Claim>) -> GateOutput {
        let mut output = GateOutput::default();
        for mut claim in claims {
            if let Err(reason) = self.check_evidence(&claim) {
                claim.status = VerificationStatus::Unverified;
                output.rejected.push((claim, reason));
                continue;
            }
            let confirmed = match &self.validator {
                None => true,
                Some(validator) => match validator.confirm(&claim).await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!(validator = validator.name(), error = %e, "Validator failed, using citation heuristic");
                        true
                    }
                },
            };
            if confirmed {
                claim.status = VerificationStatus::Verified;
                output.accepted.push(claim);
            } else {
                claim.status = VerificationStatus::Rejected;
                let validator = self.validator_name().unwrap_or("unknown").to_string();
                output.rejected.push((claim, RejectReason::ValidatorDeclined { validator }));
            }
        }
        debug!(
            accepted = output.accepted.len(),
            rejected = output.rejected.len(),
            verify_k = self.verify_k,
            "Verifier gate pass"
        );
        output
    }
}

// ── Completion checklist ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecklistFailure {
    QuestionNotAddressed,
    UncitedClaim(String),
    UnresolvedContradiction(String),
}

impl std::fmt::Display for ChecklistFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuestionNotAddressed => f.write_str("the answer does not address the question"),
            Self::UncitedClaim(text) => {
                write!(f, "claim without citations or an unverified marker: {text}")
            }
            Self::UnresolvedContradiction(desc) => write!(f, "unresolved contradiction: {desc}"),
        }
    }
}

fn addresses(question: &str, answer: &str) -> bool {
    let answer = answer.trim();
    if answer.is_empty() {
        return false;
    }
    if answer.chars().count() >= 20 {
        return true;
    }
    let lowered = answer.to_lowercase();
    query_terms(question).iter().any(|t| lowered.contains(t.as_str()))
}

/// Run once before a final answer is accepted. An empty list means pass.
///
/// `answer` is the annotated answer: every sentence that asserts something
/// must cite a reference or carry the unverified marker.
pub fn completion_checklist(
    question: &str,
    answer: &str,
    contradictions: &[Contradiction],
) -> Vec<ChecklistFailure> {
    let mut failures = Vec::new();
    if !addresses(question, answer) {
        failures.push(ChecklistFailure::QuestionNotAddressed);
    }
    failures.extend(
        unmarked_assertions(answer)
            .into_iter()
            .map(|sentence| ChecklistFailure::UncitedClaim(sentence.to_string())),
    );
    failures.extend(
        contradictions
            .iter()
            .filter(|c| !c.is_resolved_by(answer))
            .map(|c| ChecklistFailure::UnresolvedContradiction(c.describe())),
    );
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veritas_core::evidence::{Evidence, EvidenceKind};
    use crate::test_helpers::ScriptedProvider;

    struct Fixed(Result<bool, ProviderError>, AtomicUsize);

    #[async_trait]
    impl ClaimValidator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn confirm(&self, _claim: &Claim) -> Result<bool, ProviderError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone()
        }
    }

    fn fixed(result: Result<bool, ProviderError>) -> Arc<Fixed> {
        Arc::new(Fixed(result, AtomicUsize::new(0)))
    }

    fn two_files() -> Claim {
        Claim::new(
            "retry is capped",
            vec![
                Evidence::file("src/retry.rs", 10, "max_retries: 3"),
                Evidence::file("docs/retry.md", 2, "three retries"),
            ],
        )
    }

    fn one_file() -> Claim {
        Claim::new("retry is capped", vec![Evidence::file("src/retry.rs", 10, "max_retries: 3")])
    }

    #[tokio::test]
    async fn single_citation_stays_unverified() {
        let gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 2);
        let out = gate.review(vec![one_file()]).await;
        assert!(out.accepted.is_empty());
        let (claim, reason) = &out.rejected[0];
        assert_eq!(claim.status, VerificationStatus::Unverified);
        assert_eq!(
            *reason,
            RejectReason::InsufficientEvidence {
                independent: 1,
                required: 2
            }
        );
    }

    #[tokio::test]
    async fn two_independent_sources_verify() {
        let gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 2);
        let out = gate.review(vec![two_files()]).await;
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].status, VerificationStatus::Verified);
    }

    #[tokio::test]
    async fn same_file_twice_is_not_independent() {
        let gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 2);
        let claim = Claim::new(
            "x",
            vec![
                Evidence::file("src/a.rs", 1, "a"),
                Evidence::file("src/a.rs", 9, "b"),
            ],
        );
        assert!(gate.check_evidence(&claim).is_err());
    }

    #[tokio::test]
    async fn definition_usage_pair_verifies() {
        let gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 3);
        let claim = Claim::new(
            "allow gates delegation",
            vec![
                Evidence::symbol_site("src/policy.rs", 4, "allow", EvidenceKind::Definition, "fn allow"),
                Evidence::symbol_site("src/policy.rs", 40, "allow", EvidenceKind::Usage, "allow(x)"),
            ],
        );
        assert!(gate.check_evidence(&claim).is_ok());
    }

    #[tokio::test]
    async fn no_evidence_is_rejected() {
        let gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 2);
        let out = gate.review(vec![Claim::new("bare", vec![])]).await;
        assert_eq!(out.rejected[0].1, RejectReason::NoEvidence);
    }

    #[tokio::test]
    async fn raised_verify_k_needs_more_sources() {
        let mut gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 2);
        gate.set_verify_k(3);
        assert!(gate.check_evidence(&two_files()).is_err());
        gate.set_verify_k(0);
        assert_eq!(gate.verify_k(), MIN_VERIFY_K);
    }

    #[tokio::test]
    async fn validator_declines_and_confirms() {
        let no = fixed(Ok(false));
        let gate = VerifierGate::new(ValidatorChoice::Validator(no.clone()), 2);
        let out = gate.review(vec![two_files(), one_file()]).await;
        assert!(out.accepted.is_empty());
        assert_eq!(out.rejected[0].0.status, VerificationStatus::Rejected);
        // The structural check runs first; the single-source claim never reaches the validator.
        assert_eq!(no.1.load(Ordering::SeqCst), 1);

        let yes = fixed(Ok(true));
        let gate = VerifierGate::new(ValidatorChoice::Validator(yes), 2);
        assert_eq!(gate.review(vec![two_files()]).await.accepted.len(), 1);
    }

    #[tokio::test]
    async fn validator_error_falls_back_to_heuristic() {
        let broken = fixed(Err(ProviderError::Network("down".into())));
        let gate = VerifierGate::new(ValidatorChoice::Validator(broken), 2);
        assert_eq!(gate.review(vec![two_files()]).await.accepted.len(), 1);
    }

    #[test]
    fn default_validator_only_applies_to_use_default() {
        let v = fixed(Ok(true));
        let gate = VerifierGate::new(ValidatorChoice::UseDefault, 2).with_default_validator(v.clone());
        assert_eq!(gate.validator_name(), Some("fixed"));
        let gate = VerifierGate::new(ValidatorChoice::ExplicitlyDisabled, 2).with_default_validator(v);
        assert_eq!(gate.validator_name(), None);
        assert!(matches!(
            ValidatorChoice::from(ValidatorSetting::Disabled),
            ValidatorChoice::ExplicitlyDisabled
        ));
    }

    #[tokio::test]
    async fn model_validator_reads_yes_no() {
        let provider = Arc::new(ScriptedProvider::texts(&["YES.", "no"]));
        let validator = ModelValidator::new(provider.clone(), "m", 0.1);
        assert!(validator.confirm(&two_files()).await.unwrap());
        assert!(!validator.confirm(&two_files()).await.unwrap());
        let requests = provider.requests();
        assert_eq!(requests[0].max_tokens, Some(5));
        assert!(requests[0].messages[1].content.contains("docs/retry.md:2"));
    }

    #[test]
    fn checklist_items() {
        let contradiction = Contradiction {
            left: Claim::new("A is set", vec![Evidence::file("a.rs", 1, "x")]),
            right: Claim::new("A is not set", vec![Evidence::file("b.rs", 1, "y")]),
        };

        let failures = completion_checklist("What sets A?", "", &[contradiction.clone()]);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], ChecklistFailure::QuestionNotAddressed);

        let clean = completion_checklist(
            "What sets A?",
            "The sources conflict about whether A is set. [unverified]",
            &[contradiction],
        );
        assert!(clean.is_empty(), "{clean:?}");
    }

    #[test]
    fn uncited_answer_sentence_fails_the_checklist() {
        let answer = "A is set in a.rs:1 by the loader. It is also set by the scheduler.";
        let failures = completion_checklist("What sets A?", answer, &[]);
        assert_eq!(
            failures,
            vec![ChecklistFailure::UncitedClaim("It is also set by the scheduler.".into())]
        );
        assert!(failures[0].to_string().contains("unverified marker"));

        let marked = "A is set in a.rs:1 by the loader. It is also set by the scheduler. [unverified]";
        assert!(completion_checklist("What sets A?", marked, &[]).is_empty());
    }

    #[test]
    fn short_answers_must_share_a_term() {
        assert!(addresses("What is the capital of France?", "Paris, France"));
        assert!(!addresses("What is the capital of France?", "42"));
    }
}
