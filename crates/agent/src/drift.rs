//! Drift monitor: how much did the report change this turn?
//!
//! Similarity is the cosine over lowercase `[A-Za-z0-9_]+` word counts of
//! R_{t-1} and R_t. Low similarity means the report is churning, so the
//! loop compresses harder, asks for more independent citations and fans
//! out less on the next turn. A tick is produced every turn, stable or not.

use serde::Serialize;
use std::collections::HashMap;
use veritas_config::DriftConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Stable,
    IncreaseCompressionSlight,
    Tighten,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::IncreaseCompressionSlight => "increase_compression_slight",
            Self::Tighten => "increase_compression;raise_verify_k;reduce_concurrency",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftTick {
    pub turn: u32,
    pub similarity: f64,
    pub recommendation: Recommendation,
}

/// The knobs a tick can turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlParams {
    pub compression_ratio: f64,
    pub verify_k: usize,
    pub concurrency: usize,
}

fn bag_of_words(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for word in text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_ascii_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity of word counts. Two empty texts are identical; an
/// empty text against a non-empty one scores 0.
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let va = bag_of_words(a);
    let vb = bag_of_words(b);
    match (va.is_empty(), vb.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {}
    }
    let dot: f64 = va
        .iter()
        .filter_map(|(w, x)| vb.get(w).map(|y| x * y))
        .sum();
    let norm = |v: &HashMap<String, f64>| v.values().map(|x| x * x).sum::<f64>().sqrt();
    (dot / (norm(&va) * norm(&vb))).clamp(0.0, 1.0)
}

pub struct DriftMonitor {
    config: DriftConfig,
}

impl DriftMonitor {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn recommend(&self, similarity: f64) -> Recommendation {
        if similarity < self.config.danger_threshold {
            Recommendation::Tighten
        } else if similarity < self.config.warn_threshold {
            Recommendation::IncreaseCompressionSlight
        } else {
            Recommendation::Stable
        }
    }

    /// Compare two consecutive reports. The first report has nothing to
    /// drift from, so a tick with an empty `previous` is always stable.
    pub fn measure(&self, turn: u32, previous: &str, current: &str) -> DriftTick {
        let similarity = cosine_similarity(previous, current);
        let recommendation = if previous.trim().is_empty() {
            Recommendation::Stable
        } else {
            self.recommend(similarity)
        };
        DriftTick {
            turn,
            similarity,
            recommendation,
        }
    }

    /// Parameters for the next turn.
    pub fn apply(&self, tick: &DriftTick, params: ControlParams) -> ControlParams {
        let cfg = &self.config;
        let bump = |ratio: f64, step: f64| (ratio + step).min(cfg.max_compression_ratio).max(ratio);
        match tick.recommendation {
            Recommendation::Stable => params,
            Recommendation::IncreaseCompressionSlight => ControlParams {
                compression_ratio: bump(params.compression_ratio, cfg.compression_step / 2.0),
                ..params
            },
            Recommendation::Tighten => ControlParams {
                compression_ratio: bump(params.compression_ratio, cfg.compression_step),
                verify_k: (params.verify_k + 1).min(cfg.max_verify_k).max(params.verify_k),
                concurrency: (params.concurrency / 2)
                    .max(cfg.min_concurrency)
                    .min(params.concurrency),
            },
        }
    }
}
