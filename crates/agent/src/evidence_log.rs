//! Append-only provenance log of every citation seen in a session.
//!
//! Records are keyed by the content hash of `(source_id, location, snippet)`
//! so re-citing the same thing is a no-op, and nothing in the log points at
//! anything else in it.

use serde::Serialize;
use std::collections::HashMap;
use veritas_cas::content_hash;
use veritas_core::evidence::Evidence;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub turn: u32,
    pub call_id: String,
    pub tool_name: String,
    pub evidence: Evidence,
}

#[derive(Debug, Default, Clone)]
pub struct EvidenceLog {
    records: Vec<EvidenceRecord>,
    index: HashMap<String, usize>,
}

pub fn evidence_id(evidence: &Evidence) -> String {
    let material = format!(
        "{}\u{0}{}\u{0}{}",
        evidence.source_id, evidence.location, evidence.snippet
    );
    content_hash(material.as_bytes())
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `evidence`, returning its id and whether it was new.
    pub fn append(
        &mut self,
        turn: u32,
        call_id: &str,
        tool_name: &str,
        evidence: Evidence,
    ) -> (String, bool) {
        let id = evidence_id(&evidence);
        if self.index.contains_key(&id) {
            return (id, false);
        }
        self.index.insert(id.clone(), self.records.len());
        self.records.push(EvidenceRecord {
            id: id.clone(),
            turn,
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            evidence,
        });
        (id, true)
    }

    pub fn get(&self, id: &str) -> Option<&EvidenceRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evidence matching a reference written in an answer.
    ///
    /// `reference` is a URL, a `path:line`, or a `path:start-end` range.
    /// It matches on exact location or source id; a `path:line` also
    /// matches any ranged citation of the same file covering that line.
    pub fn resolve(&self, reference: &str) -> Vec<&Evidence> {
        let reference = reference.trim_end_matches('/');
        let wanted = parse_file_ref(reference);
        self.records
            .iter()
            .map(|r| &r.evidence)
            .filter(|e| {
                if e.location.trim_end_matches('/') == reference || e.source_id == reference {
                    return true;
                }
                match (wanted, parse_file_ref(&e.location)) {
                    (Some((path, start, end)), Some((epath, estart, eend))) => {
                        path == epath && start >= estart && end <= eend
                    }
                    _ => false,
                }
            })
            .collect()
    }
}

/// Split `path:line` or `path:start-end` into parts.
fn parse_file_ref(reference: &str) -> Option<(&str, usize, usize)> {
    if reference.contains("://") {
        return None;
    }
    let (path, lines) = reference.rsplit_once(':')?;
    let (start, end) = match lines.split_once('-') {
        Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
        None => {
            let n = lines.parse().ok()?;
            (n, n)
        }
    };
    (!path.is_empty()).then_some((path, start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_is_idempotent() {
        let mut log = EvidenceLog::new();
        let e = Evidence::file("src/lib.rs", 3, "fn main() {}");
        let (id, new) = log.append(1, "react_0", "read_file", e.clone());
        assert!(new);
        let (again, new) = log.append(2, "react_1", "read_file", e);
        assert!(!new);
        assert_eq!(id, again);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get(&id).unwrap().turn, 1);
    }

    #[test]
    fn different_snippets_get_different_ids() {
        let a = Evidence::file("src/lib.rs", 3, "one");
        let b = Evidence::file("src/lib.rs", 3, "two");
        assert_ne!(evidence_id(&a), evidence_id(&b));
    }

    #[test]
    fn resolves_exact_ranges_and_urls() {
        let mut log = EvidenceLog::new();
        let mut ranged = Evidence::file("src/policy.rs", 10, "fn allow()");
        ranged.location = "src/policy.rs:10-20".into();
        log.append(1, "c1", "read_file", ranged);
        log.append(1, "c2", "search_papers", Evidence::document("https://arxiv.org/abs/2210.03629", "ReAct"));

        assert_eq!(log.resolve("src/policy.rs:10-20").len(), 1);
        assert_eq!(log.resolve("src/policy.rs:15").len(), 1);
        assert!(log.resolve("src/policy.rs:25").is_empty());
        assert!(log.resolve("src/other.rs:15").is_empty());
        assert_eq!(log.resolve("https://arxiv.org/abs/2210.03629/").len(), 1);
    }

    #[test]
    fn file_refs_parse() {
        assert_eq!(parse_file_ref("a/b.rs:3"), Some(("a/b.rs", 3, 3)));
        assert_eq!(parse_file_ref("a/b.rs:3-9"), Some(("a/b.rs", 3, 9)));
        assert_eq!(parse_file_ref("https://x.org:8080"), None);
        assert_eq!(parse_file_ref("nonsense"), None);
    }
}
