//! Claim extraction and contradiction detection.
//!
//! Claims come from two places: successful observations with citations
//! (one claim each), and final-answer sentences that cite something the
//! session actually saw. Contradictions are pairs of claims that differ
//! only by negation.

use regex_lite::Regex;
use std::sync::LazyLock;
use veritas_core::evidence::{Claim, Evidence, Observation};
use crate::evidence_log::EvidenceLog;

pub const MAX_CLAIM_CHARS: usize = 240;

/// Appended to answer sentences whose citations did not verify.
pub const UNVERIFIED_MARKER: &str = " [unverified]";

const NEGATIONS: &[&str] = &["not", "no", "never"];
const ACKNOWLEDGEMENTS: &[&str] = &["contradict", "conflict", "inconsistent", "disagree"];

static REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s)\]>,;]+|sandbox:[0-9a-f]{8,}|[\w./-]*[./][\w./-]*:\d+(?:-\d+)?").ok()
});

fn is_meaningful(line: &str) -> bool {
    !line.starts_with("---") && line.chars().filter(|c| c.is_alphanumeric()).count() >= 3
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// The claim an observation supports, if it succeeded with citations.
///
/// The text is the first meaningful line of the leading citation, or of the
/// raw output when the citation carries no usable text.
pub fn claim_from_observation(obs: &Observation) -> Option<Claim> {
    if !obs.success || obs.citations.is_empty() {
        return None;
    }
    let first_line = |text: &str| {
        text.lines()
            .map(str::trim)
            .find(|l| is_meaningful(l))
            .map(str::to_string)
    };
    let text = first_line(&obs.citations[0].snippet).or_else(|| first_line(&obs.raw_output))?;
    Some(Claim::new(truncate_chars(&text, MAX_CLAIM_CHARS), obs.citations.clone()))
}

// ── Answer sentences ──────────────────────────────────────────────────────

/// A cited sentence of a final answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerClaim {
    /// Byte range of the sentence in the answer
    pub span: (usize, usize),
    /// References as written
    pub references: Vec<String>,
    /// Claim over whatever evidence those references resolved to
    pub claim: Claim,
}

/// Sentence byte ranges, trimmed. A sentence ends at `.`, `!` or `?`
/// followed by whitespace (or the end), or at a newline.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let next_is_space = chars.peek().is_none_or(|(_, n)| n.is_whitespace());
        let end = match c {
            '\n' => Some(i),
            '.' | '!' | '?' if next_is_space => Some(i + c.len_utf8()),
            _ => None,
        };
        if let Some(end) = end {
            push_trimmed(text, start, end, &mut spans);
            start = end;
        }
    }
    push_trimmed(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        spans.push((start + lead, start + lead + trimmed.len()));
    }
}

fn references(sentence: &str) -> Vec<String> {
    let Some(re) = REFERENCE.as_ref() else {
        return Vec::new();
    };
    let mut refs: Vec<String> = re
        .find_iter(sentence)
        .map(|m| m.as_str().trim_end_matches(['.', ':', ')']).to_string())
        .filter(|r| !r.is_empty())
        .collect();
    refs.dedup();
    refs
}

/// Cited sentences of `answer`, each as a claim over resolved evidence.
/// A reference the log does not know contributes no evidence.
pub fn answer_claims(answer: &str, log: &EvidenceLog) -> Vec<AnswerClaim> {
    sentence_spans(answer)
        .into_iter()
        .filter_map(|span| {
            let sentence = &answer[span.0..span.1];
            let refs = references(sentence);
            if refs.is_empty() {
                return None;
            }
            let evidence: Vec<Evidence> = refs
                .iter()
                .flat_map(|r| log.resolve(r))
                .cloned()
                .collect();
            Some(AnswerClaim {
                span,
                references: refs,
                claim: Claim::new(sentence, evidence),
            })
        })
        .collect()
}

/// Sentences that assert something yet cite nothing. Questions and
/// fragments under three words are not assertions.
pub fn uncited_assertions(answer: &str) -> Vec<(usize, usize)> {
    sentence_spans(answer)
        .into_iter()
        .filter(|&(start, end)| {
            let sentence = &answer[start..end];
            is_assertion(sentence) && references(sentence).is_empty()
        })
        .collect()
}

/// Uncited assertions carrying no [`UNVERIFIED_MARKER`], in order.
pub fn unmarked_assertions(answer: &str) -> Vec<&str> {
    uncited_assertions(answer)
        .into_iter()
        .filter(|&span| !is_marked(answer, span))
        .map(|(start, end)| &answer[start..end])
        .collect()
}

fn is_assertion(sentence: &str) -> bool {
    !sentence.ends_with('?')
        && !sentence.starts_with(UNVERIFIED_MARKER.trim())
        && sentence.split_whitespace().count() >= 3
}

fn is_marked(answer: &str, (start, end): (usize, usize)) -> bool {
    answer[start..end].contains(UNVERIFIED_MARKER.trim())
        || answer[end..].starts_with(UNVERIFIED_MARKER)
}

/// Append [`UNVERIFIED_MARKER`] after each flagged sentence.
pub fn annotate_answer(answer: &str, flagged: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(answer.len() + flagged.len() * UNVERIFIED_MARKER.len());
    let mut cursor = 0;
    let mut spans = flagged.to_vec();
    spans.sort_unstable();
    for (start, end) in spans {
        if end < cursor || is_marked(answer, (start, end)) {
            continue;
        }
        out.push_str(&answer[cursor..end]);
        out.push_str(UNVERIFIED_MARKER);
        cursor = end;
    }
    out.push_str(&answer[cursor..]);
    out
}

// ── Contradictions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Contradiction {
    pub left: Claim,
    pub right: Claim,
}

impl Contradiction {
    pub fn describe(&self) -> String {
        format!("{:?} contradicts {:?}", self.left.text, self.right.text)
    }

    /// Acknowledged in so many words, or both sides cited.
    pub fn is_resolved_by(&self, answer: &str) -> bool {
        let lowered = answer.to_lowercase();
        if ACKNOWLEDGEMENTS.iter().any(|w| lowered.contains(w)) {
            return true;
        }
        let cites = |claim: &Claim| {
            claim
                .supporting_evidence
                .iter()
                .any(|e| answer.contains(&e.location) || answer.contains(&e.domain_or_file))
        };
        cites(&self.left) && cites(&self.right)
    }
}

/// Content words and the number of negations.
fn normalize(text: &str) -> (Vec<String>, usize) {
    let mut words = Vec::new();
    let mut negations = 0;
    let lowered = text.to_lowercase();
    for token in lowered.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '_')) {
        let token = token.trim_matches('\'');
        if token.is_empty() {
            continue;
        }
        if NEGATIONS.contains(&token) {
            negations += 1;
        } else if let Some(stem) = token.strip_suffix("n't") {
            negations += 1;
            if !stem.is_empty() {
                words.push(stem.to_string());
            }
        } else {
            words.push(token.to_string());
        }
    }
    (words, negations)
}

/// Pairs of claims that say the same thing except for a negation.
pub fn find_contradictions(claims: &[Claim]) -> Vec<Contradiction> {
    let normalized: Vec<_> = claims.iter().map(|c| normalize(&c.text)).collect();
    let mut found = Vec::new();
    for i in 0..claims.len() {
        for j in i + 1..claims.len() {
            let (wa, na) = &normalized[i];
            let (wb, nb) = &normalized[j];
            if !wa.is_empty() && wa == wb && na % 2 != nb % 2 {
                found.push(Contradiction {
                    left: claims[i].clone(),
                    right: claims[j].clone(),
                });
            }
        }
    }
    found
}
