//! The compressed report R_t.
//!
//! R_t is the only memory the loop keeps between turns. It holds verified
//! claims, unverified claims (always rendered with an explicit marker) and
//! short per-turn notes summarizing observations. [`Report::enforce_cap`]
//! keeps the rendering within R_cap tokens.

use serde::{Deserialize, Serialize};
use veritas_core::evidence::{Claim, VerificationStatus};
use crate::token::{estimate_tokens, truncate_to_tokens};

/// Floor for a compressed observation summary.
pub const MIN_SUMMARY_TOKENS: usize = 16;

/// Appended wherever text was cut.
pub const ELLIPSIS: &str = " …";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Verified,
    Unverified,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: EntryKind,
    pub turn: u32,
    pub text: String,
    /// Citation locations (`path:line`, URL, `sandbox:<hash>`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

impl ReportEntry {
    pub fn render(&self) -> String {
        let tag = match self.kind {
            EntryKind::Verified => "[verified]".to_string(),
            EntryKind::Unverified => "[unverified]".to_string(),
            EntryKind::Note => format!("[note t{}]", self.turn),
        };
        if self.citations.is_empty() {
            format!("- {tag} {}", self.text)
        } else {
            format!("- {tag} {} ({})", self.text, self.citations.join("; "))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    entries: Vec<ReportEntry>,
    cap_tokens: usize,
}

impl Report {
    pub fn new(cap_tokens: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap_tokens,
        }
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn cap_tokens(&self) -> usize {
        self.cap_tokens
    }

    pub fn verified(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Verified)
    }

    /// Add a claim. Anything not `Verified` is recorded as unverified.
    ///
    /// A claim whose text is already present is skipped, except that an
    /// unverified entry is upgraded when the same text arrives verified.
    /// Returns whether the report changed.
    pub fn push_claim(&mut self, claim: &Claim, turn: u32) -> bool {
        let kind = if claim.status == VerificationStatus::Verified {
            EntryKind::Verified
        } else {
            EntryKind::Unverified
        };
        let citations: Vec<String> = claim
            .supporting_evidence
            .iter()
            .map(|e| e.location.clone())
            .collect();

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.kind != EntryKind::Note && e.text == claim.text)
        {
            if existing.kind == EntryKind::Unverified && kind == EntryKind::Verified {
                existing.kind = EntryKind::Verified;
                existing.citations = citations;
                existing.turn = turn;
                return true;
            }
            return false;
        }

        self.entries.push(ReportEntry {
            kind,
            turn,
            text: claim.text.clone(),
            citations,
        });
        true
    }

    pub fn push_note(&mut self, text: impl Into<String>, turn: u32) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        self.entries.push(ReportEntry {
            kind: EntryKind::Note,
            turn,
            text,
            citations: Vec::new(),
        });
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ReportEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.render())
    }

    /// Evict until the rendering fits R_cap: oldest notes first, then oldest
    /// unverified claims, then oldest verified claims. A single remaining
    /// entry that still does not fit is truncated. Returns the number of
    /// evicted entries.
    pub fn enforce_cap(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > 1 && self.tokens() > self.cap_tokens {
            let victim = [EntryKind::Note, EntryKind::Unverified, EntryKind::Verified]
                .iter()
                .find_map(|kind| self.entries.iter().position(|e| e.kind == *kind))
                .unwrap_or(0);
            self.entries.remove(victim);
            evicted += 1;
        }
        if self.tokens() > self.cap_tokens {
            self.truncate_last();
        }
        evicted
    }

    fn truncate_last(&mut self) {
        let budget = self.cap_tokens.saturating_mul(4);
        let Some(entry) = self.entries.first_mut() else {
            return;
        };
        let fixed = |e: &ReportEntry| e.render().len() - e.text.len();
        if fixed(entry) + ELLIPSIS.len() > budget {
            entry.citations.clear();
        }
        let overhead = fixed(entry) + ELLIPSIS.len();
        if overhead > budget {
            self.entries.clear();
            return;
        }
        let mut end = (budget - overhead).min(entry.text.len());
        while end > 0 && !entry.text.is_char_boundary(end) {
            end -= 1;
        }
        entry.text.truncate(end);
        entry.text.push_str(ELLIPSIS);
    }
}

/// Compress an observation summary, keeping
/// `ceil(tokens × (1 − ratio))` tokens but never fewer than
/// [`MIN_SUMMARY_TOKENS`].
pub fn compress_summary(text: &str, ratio: f64) -> String {
    let tokens = estimate_tokens(text);
    let keep = ((tokens as f64) * (1.0 - ratio.clamp(0.0, 1.0))).ceil() as usize;
    let cut = truncate_to_tokens(text, keep.max(MIN_SUMMARY_TOKENS));
    if cut.len() == text.len() {
        text.to_string()
    } else {
        format!("{}{ELLIPSIS}", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::evidence::Evidence;

    fn claim(text: &str, status: VerificationStatus) -> Claim {
        let mut c = Claim::new(
            text,
            vec![
                Evidence::file("src/a.rs", 1, "a"),
                Evidence::file("src/b.rs", 2, "b"),
            ],
        );
        c.status = status;
        c
    }

    #[test]
    fn rendering_marks_unverified_claims() {
        let mut r = Report::new(1000);
        r.push_claim(&claim("A holds", VerificationStatus::Verified), 1);
        r.push_claim(&claim("B holds", VerificationStatus::Unverified), 1);
        r.push_note("searched for A", 1);
        let text = r.render();
        assert!(text.contains("- [verified] A holds (src/a.rs:1; src/b.rs:2)"));
        assert!(text.contains("- [unverified] B holds"));
        assert!(text.contains("- [note t1] searched for A"));
        assert_eq!(r.verified().count(), 1);
    }

    #[test]
    fn rejected_claims_are_never_rendered_verified() {
        let mut r = Report::new(1000);
        r.push_claim(&claim("C holds", VerificationStatus::Rejected), 2);
        assert_eq!(r.entries()[0].kind, EntryKind::Unverified);
    }

    #[test]
    fn duplicate_claim_upgrades_or_skips() {
        let mut r = Report::new(1000);
        assert!(r.push_claim(&claim("A", VerificationStatus::Unverified), 1));
        assert!(!r.push_claim(&claim("A", VerificationStatus::Unverified), 2));
        assert!(r.push_claim(&claim("A", VerificationStatus::Verified), 3));
        assert_eq!(r.len(), 1);
        assert_eq!(r.entries()[0].kind, EntryKind::Verified);
        assert!(!r.push_claim(&claim("A", VerificationStatus::Unverified), 4));
        assert_eq!(r.entries()[0].kind, EntryKind::Verified);
    }

    #[test]
    fn eviction_order_notes_then_unverified_then_verified() {
        let mut r = Report::new(1000);
        r.push_claim(&claim("verified one", VerificationStatus::Verified), 1);
        r.push_claim(&claim("unverified one", VerificationStatus::Unverified), 1);
        r.push_note("note one", 1);
        r.push_note("note two", 2);
        r.cap_tokens = r.tokens() - 1;
        assert_eq!(r.enforce_cap(), 1);
        assert!(!r.render().contains("note one"));
        assert!(r.render().contains("note two"));

        r.cap_tokens = estimate_tokens(&r.entries()[0].render()) + 1;
        r.enforce_cap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.entries()[0].text, "verified one");
    }

    #[test]
    fn cap_holds_after_many_turns() {
        let mut r = Report::new(200);
        for turn in 0..100 {
            r.push_claim(&claim(&format!("claim number {turn}"), VerificationStatus::Verified), turn);
            r.push_note(format!("observation summary for turn {turn}"), turn);
            r.enforce_cap();
            assert!(r.tokens() <= 200, "turn {turn}: {} tokens", r.tokens());
        }
        assert!(r.render().contains("claim number 99"));
    }

    #[test]
    fn oversized_single_entry_is_truncated() {
        let mut r = Report::new(20);
        r.push_note("x".repeat(500), 1);
        r.enforce_cap();
        assert_eq!(r.len(), 1);
        assert!(r.tokens() <= 20);
        assert!(r.entries()[0].text.ends_with(ELLIPSIS));
    }

    #[test]
    fn summary_compression_keeps_ratio_with_floor() {
        let text = "word ".repeat(200);
        let out = compress_summary(&text, 0.5);
        assert!(out.ends_with(ELLIPSIS));
        assert!(estimate_tokens(&out) <= 125 + 1);
        assert!(estimate_tokens(&out) >= 120);

        let minimal = compress_summary(&text, 0.95);
        assert!(estimate_tokens(&minimal) >= MIN_SUMMARY_TOKENS);
        assert_eq!(compress_summary("short text", 0.9), "short text");
    }
}
