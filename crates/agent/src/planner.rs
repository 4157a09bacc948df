//! Adaptive planner: tiered, bounded-concurrency project scans.
//!
//! A scan request becomes a manifest split into tier 1 (the configured
//! high-value top-level directories) and tier 2 (everything else). Tier 1
//! runs first; if it finds fewer than `hit_threshold` hits the planner
//! escalates to tier 2 instead of coming back empty. A stage whose mean
//! per-file latency exceeds `latency_threshold_ms` halves the worker pool
//! for the stages after it.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info};
use veritas_config::PlannerConfig;
use veritas_core::evidence::Observation;
use veritas_core::provider::ToolDefinition;
use veritas_core::tool::ToolCall;
use veritas_tools::{CodeSearcher, SearchHit, query_terms};

pub const SCAN_PROJECT_TOOL: &str = "scan_project";

/// Hits rendered into a scan observation.
pub const MAX_RENDERED_HITS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub tier: Tier,
}

/// One stage of a plan: the files of a tier and the pool size to scan them with.
#[derive(Debug, Clone)]
pub struct PlannerStage {
    pub tier: Tier,
    pub target_paths: Vec<String>,
    pub concurrency_cap: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub tier: Tier,
    pub scanned: usize,
    pub hits: usize,
    pub mean_latency_ms: u64,
    pub concurrency_cap: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub hits: Vec<SearchHit>,
    pub stages: Vec<StageReport>,
    pub escalated: bool,
    pub cancelled: bool,
}

impl ScanOutcome {
    /// Render as the observation for `call`, citing the first `max_hits` hits.
    pub fn into_observation(self, call: &ToolCall, max_hits: usize) -> Observation {
        let scanned: usize = self.stages.iter().map(|s| s.scanned).sum();
        let mut out = format!(
            "Scanned {scanned} file(s) in {} stage(s), {} hit(s).",
            self.stages.len(),
            self.hits.len()
        );
        for stage in &self.stages {
            out.push_str(&format!(
                "\n{}: {} file(s), {} hit(s), concurrency {}",
                stage.tier, stage.scanned, stage.hits, stage.concurrency_cap
            ));
        }
        if self.escalated {
            out.push_str("\nTier 1 was insufficient; escalated to a full scan.");
        }
        if self.cancelled {
            out.push_str("\nScan cut short by the deadline; results are partial.");
        }

        let shown: Vec<&SearchHit> = self.hits.iter().take(max_hits).collect();
        for hit in &shown {
            out.push_str(&format!("\n{}:{} {}", hit.path, hit.line, hit.snippet));
        }
        if self.hits.len() > shown.len() {
            out.push_str(&format!("\n… {} more hit(s) omitted", self.hits.len() - shown.len()));
        }

        Observation {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            raw_output: out,
            citations: shown.iter().map(|h| h.to_evidence()).collect(),
            success: true,
            error_kind: None,
        }
    }
}

pub struct AdaptivePlanner {
    searcher: Arc<CodeSearcher>,
    config: PlannerConfig,
}

impl AdaptivePlanner {
    pub fn new(searcher: Arc<CodeSearcher>, config: PlannerConfig) -> Self {
        Self { searcher, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn tier_of(&self, path: &str) -> Tier {
        let first = path.split('/').next().unwrap_or_default();
        if path.contains('/') && self.config.tier1_dirs.iter().any(|d| d.trim_matches('/') == first) {
            Tier::Tier1
        } else {
            Tier::Tier2
        }
    }

    /// Every scannable file in the workspace, tagged with its tier.
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.searcher
            .workspace()
            .files(self.config.max_file_bytes)
            .into_iter()
            .map(|f| ManifestEntry {
                tier: self.tier_of(&f.relative),
                path: f.relative,
                size: f.size,
            })
            .collect()
    }

    /// Scan for `query` starting with a pool of `concurrency` workers
    /// (clamped to the configured cap). Work still running at `deadline`
    /// is dropped and the outcome marked cancelled.
    pub async fn scan(&self, query: &str, concurrency: usize, deadline: Option<Instant>) -> ScanOutcome {
        let terms: Arc<[String]> = query_terms(query).into();
        if terms.is_empty() {
            return ScanOutcome::default();
        }

        let (tier1, tier2): (Vec<_>, Vec<_>) =
            self.manifest().into_iter().partition(|e| e.tier == Tier::Tier1);
        let mut cap = concurrency.clamp(1, self.config.concurrency_cap.max(1));
        let mut outcome = ScanOutcome::default();

        let stages = [
            (Tier::Tier1, tier1.into_iter().map(|e| e.path).collect::<Vec<_>>()),
            (Tier::Tier2, tier2.into_iter().map(|e| e.path).collect::<Vec<_>>()),
        ];
        for (tier, target_paths) in stages {
            if tier == Tier::Tier2 {
                if outcome.cancelled || outcome.hits.len() >= self.config.hit_threshold {
                    break;
                }
                outcome.escalated = true;
                info!(
                    hits = outcome.hits.len(),
                    threshold = self.config.hit_threshold,
                    "Tier 1 insufficient, escalating to tier 2"
                );
            }
            if target_paths.is_empty() {
                continue;
            }

            let stage = PlannerStage {
                tier,
                target_paths,
                concurrency_cap: cap,
            };
            let (hits, report) = self.run_stage(&stage, terms.clone(), deadline).await;
            if report.mean_latency_ms > self.config.latency_threshold_ms && cap > 1 {
                cap = (cap / 2).max(1);
                info!(
                    mean_latency_ms = report.mean_latency_ms,
                    next_cap = cap,
                    "Stage latency over threshold, shedding concurrency"
                );
            }
            outcome.cancelled |= report.cancelled;
            outcome.hits.extend(hits);
            outcome.stages.push(report);
        }
        outcome
    }

    async fn run_stage(
        &self,
        stage: &PlannerStage,
        terms: Arc<[String]>,
        deadline: Option<Instant>,
    ) -> (Vec<SearchHit>, StageReport) {
        let pool = Arc::new(Semaphore::new(stage.concurrency_cap.max(1)));
        let per_group = self.config.per_group_cap.max(1);
        let mut groups: HashMap<&str, Arc<Semaphore>> = HashMap::new();

        let mut tasks = FuturesUnordered::new();
        for (index, path) in stage.target_paths.iter().enumerate() {
            let group = groups
                .entry(parent_dir(path))
                .or_insert_with(|| Arc::new(Semaphore::new(per_group)))
                .clone();
            let pool = pool.clone();
            let searcher = self.searcher.clone();
            let terms = terms.clone();
            tasks.push(async move {
                let _group = group.acquire_owned().await.ok();
                let _slot = pool.acquire_owned().await.ok();
                let started = Instant::now();
                let hits = searcher.search_file(path, &terms).await;
                let finished = Instant::now();
                (finished, index, finished - started, hits)
            });
        }

        let mut done = Vec::with_capacity(stage.target_paths.len());
        let mut cancelled = false;
        loop {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                cancelled = true;
                break;
            }
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        cancelled = true;
                        break;
                    }
                },
                None => tasks.next().await,
            };
            match next {
                Some(result) => done.push(result),
                None => break,
            }
        }
        drop(tasks);

        // Completion order, ties broken by manifest position.
        done.sort_by_key(|(finished, index, _, _)| (*finished, *index));
        let total_latency: Duration = done.iter().map(|(_, _, latency, _)| *latency).sum();
        let mean_latency_ms = match done.len() {
            0 => 0,
            n => (total_latency.as_millis() / n as u128) as u64,
        };
        let scanned = done.len();
        let hits: Vec<SearchHit> = done.into_iter().flat_map(|(_, _, _, hits)| hits).collect();

        debug!(
            tier = %stage.tier,
            scanned,
            hits = hits.len(),
            mean_latency_ms,
            cancelled,
            "Planner stage complete"
        );
        let report = StageReport {
            tier: stage.tier,
            scanned,
            hits: hits.len(),
            mean_latency_ms,
            concurrency_cap: stage.concurrency_cap,
            cancelled,
        };
        (hits, report)
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub fn scan_project_definition() -> ToolDefinition {
    ToolDefinition {
        name: SCAN_PROJECT_TOOL.into(),
        description: "Scan the whole project for evidence about a topic. Primary source, schema \
                      and docs directories are searched first; the rest of the tree only if they \
                      yield too little."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Identifiers or keywords to look for"
                }
            },
            "required": ["query"]
        }),
    }
}
