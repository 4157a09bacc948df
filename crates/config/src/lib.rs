//! Configuration loading, validation, and management for Veritas.
//!
//! Loads configuration from `~/.veritas/config.toml` with environment
//! variable overrides. Validates all settings at startup so the research
//! loop can rely on its caps being sane.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.veritas/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model selection and sampling
    #[serde(default)]
    pub model: ModelConfig,

    /// Research loop budgets
    #[serde(default)]
    pub agent: LoopConfig,

    /// Verifier gate settings
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Drift monitor thresholds
    #[serde(default)]
    pub drift: DriftConfig,

    /// Delegate budgets
    #[serde(default)]
    pub delegation: DelegationConfig,

    /// Adaptive planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Sandbox resource caps
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Content-addressed store settings
    #[serde(default)]
    pub cas: CasConfig,

    /// Which tools are exposed to the model
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("agent", &self.agent)
            .field("verifier", &self.verifier)
            .field("drift", &self.drift)
            .field("delegation", &self.delegation)
            .field("planner", &self.planner)
            .field("sandbox", &self.sandbox)
            .field("cas", &self.cas)
            .field("tools", &self.tools)
            .finish()
    }
}

// ── Model ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used on most turns
    #[serde(default = "default_primary_model")]
    pub primary: String,

    /// Cheaper model used every `free_interval`-th call, if set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<String>,

    #[serde(default = "default_free_interval")]
    pub free_interval: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_primary_model() -> String {
    "alibaba/tongyi-deepresearch-30b-a3b".into()
}
fn default_free_interval() -> u64 {
    3
}
fn default_temperature() -> f32 {
    0.85
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_model(),
            free: None,
            free_interval: default_free_interval(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

// ── Loop ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Task-wide tool call cap
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    /// Turn cap, guards against a model that never calls a tool nor answers
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Per model/tool/delegate call timeout
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// R_cap: token ceiling of the running report
    #[serde(default = "default_report_cap")]
    pub report_cap_tokens: usize,

    /// Token ceiling of the per-turn observation summary
    #[serde(default = "default_observation_cap")]
    pub observation_cap_tokens: usize,

    /// Share of each observation summary discarded before merging
    #[serde(default = "default_compression_ratio")]
    pub compression_ratio: f64,

    /// Independent sources required to verify a claim
    #[serde(default = "default_verify_k")]
    pub verify_k: usize,

    /// Keep rejected claims in the report with an unverified marker
    #[serde(default = "default_true")]
    pub retain_unverified: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_tool_calls() -> u32 {
    128
}
fn default_max_turns() -> u32 {
    64
}
fn default_session_timeout() -> u64 {
    1800
}
fn default_call_timeout() -> u64 {
    60
}
fn default_report_cap() -> usize {
    7000
}
fn default_observation_cap() -> usize {
    1500
}
fn default_compression_ratio() -> f64 {
    0.3
}
fn default_verify_k() -> usize {
    2
}
fn default_true() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            max_turns: default_max_turns(),
            session_timeout_secs: default_session_timeout(),
            call_timeout_secs: default_call_timeout(),
            report_cap_tokens: default_report_cap(),
            observation_cap_tokens: default_observation_cap(),
            compression_ratio: default_compression_ratio(),
            verify_k: default_verify_k(),
            retain_unverified: true,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    250
}
fn default_max_delay() -> u64 {
    4000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

// ── Verifier ──────────────────────────────────────────────────────────────

/// Whether the verifier consults a model for entailment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorSetting {
    /// Use the session's own provider as validator
    #[default]
    Default,
    /// Citation-count heuristic only
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub validator: ValidatorSetting,

    #[serde(default = "default_validator_temperature")]
    pub validator_temperature: f32,
}

fn default_validator_temperature() -> f32 {
    0.1
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            validator: ValidatorSetting::Default,
            validator_temperature: default_validator_temperature(),
        }
    }
}

// ── Drift ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Below this similarity, compress slightly more
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,

    /// Below this similarity, compress, raise verify-k and shed concurrency
    #[serde(default = "default_danger_threshold")]
    pub danger_threshold: f64,

    #[serde(default = "default_compression_step")]
    pub compression_step: f64,

    #[serde(default = "default_max_compression")]
    pub max_compression_ratio: f64,

    #[serde(default = "default_max_verify_k")]
    pub max_verify_k: usize,

    /// Floor for planner concurrency after shedding
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,
}

fn default_warn_threshold() -> f64 {
    0.98
}
fn default_danger_threshold() -> f64 {
    0.95
}
fn default_compression_step() -> f64 {
    0.1
}
fn default_max_compression() -> f64 {
    0.9
}
fn default_max_verify_k() -> usize {
    4
}
fn default_min_concurrency() -> usize {
    4
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
            danger_threshold: default_danger_threshold(),
            compression_step: default_compression_step(),
            max_compression_ratio: default_max_compression(),
            max_verify_k: default_max_verify_k(),
            min_concurrency: default_min_concurrency(),
        }
    }
}

// ── Delegation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Token target for compressed delegate responses
    #[serde(default = "default_compress_target")]
    pub compress_target_tokens: usize,

    /// Concurrent delegate calls within one turn
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Per-agent budgets, fixed for a session
    #[serde(default = "default_agents")]
    pub agents: BTreeMap<String, AgentBudgetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBudgetConfig {
    pub max_calls: u32,
    pub tokens_per_call: u32,
    /// Model override for this delegate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_compress_target() -> usize {
    800
}
fn default_max_parallel() -> usize {
    4
}
fn default_agents() -> BTreeMap<String, AgentBudgetConfig> {
    BTreeMap::from([
        (
            "summarizer".to_string(),
            AgentBudgetConfig {
                max_calls: 3,
                tokens_per_call: 1200,
                model: None,
            },
        ),
        (
            "reasoner".to_string(),
            AgentBudgetConfig {
                max_calls: 2,
                tokens_per_call: 2000,
                model: None,
            },
        ),
    ])
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            compress_target_tokens: default_compress_target(),
            max_parallel: default_max_parallel(),
            agents: default_agents(),
        }
    }
}

// ── Planner ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Worker pool size for a stage
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: usize,

    /// Concurrent tasks per directory
    #[serde(default = "default_per_group_cap")]
    pub per_group_cap: usize,

    /// Top-level directories scanned first
    #[serde(default = "default_tier1_dirs")]
    pub tier1_dirs: Vec<String>,

    /// Tier-1 hits below this escalate to a tier-2 scan
    #[serde(default = "default_hit_threshold")]
    pub hit_threshold: usize,

    /// Mean task latency above this halves concurrency for the next stage
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_ms: u64,

    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_concurrency_cap() -> usize {
    16
}
fn default_per_group_cap() -> usize {
    4
}
fn default_tier1_dirs() -> Vec<String> {
    vec!["src".into(), "schemas".into(), "docs".into()]
}
fn default_hit_threshold() -> usize {
    3
}
fn default_latency_threshold() -> u64 {
    1500
}
fn default_max_file_bytes() -> u64 {
    256_000
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: default_concurrency_cap(),
            per_group_cap: default_per_group_cap(),
            tier1_dirs: default_tier1_dirs(),
            hit_threshold: default_hit_threshold(),
            latency_threshold_ms: default_latency_threshold(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

// ── Sandbox ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Combined stdout+stderr cap
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Python interpreter for `language = "python"`
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_sandbox_timeout() -> u64 {
    60
}
fn default_output_cap() -> usize {
    64 * 1024
}
fn default_seed() -> u64 {
    1337
}
fn default_python() -> String {
    "python3".into()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout(),
            output_cap_bytes: default_output_cap(),
            seed: default_seed(),
            python: default_python(),
        }
    }
}

// ── CAS ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasConfig {
    /// Store directory; `~/.veritas/cas` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Version tag for tool outputs memoized in the store
    #[serde(default = "default_parser_version")]
    pub parser_version: String,
}

fn default_parser_version() -> String {
    "veritas-tools-v1".into()
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            dir: None,
            parser_version: default_parser_version(),
        }
    }
}

impl CasConfig {
    /// The effective store directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("cas"))
    }
}

// ── Tools ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_enabled_tools")]
    pub enabled: Vec<String>,
}

fn default_enabled_tools() -> Vec<String> {
    [
        "search_code",
        "read_file",
        "run_sandbox",
        "search_papers",
        "scan_project",
        "delegate",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_tools(),
        }
    }
}

impl ToolsConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|t| t == name)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.veritas/config.toml).
    ///
    /// Environment overrides:
    /// - `VERITAS_API_KEY`, then `OPENROUTER_API_KEY`, then `OPENAI_API_KEY`
    /// - `VERITAS_MODEL`, `VERITAS_FREE_MODEL`, `VERITAS_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// [`AppConfig::load_from`] followed by the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("VERITAS_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(model) = std::env::var("VERITAS_MODEL") {
            self.model.primary = model;
        }
        if let Ok(model) = std::env::var("VERITAS_FREE_MODEL") {
            self.model.free = Some(model);
        }
        if let Ok(url) = std::env::var("VERITAS_BASE_URL") {
            self.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".veritas")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::ValidationError(msg.into())) };

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return fail("model.temperature must be between 0.0 and 2.0");
        }
        if self.model.free_interval == 0 {
            return fail("model.free_interval must be at least 1");
        }
        if self.agent.max_tool_calls == 0 {
            return fail("agent.max_tool_calls must be at least 1");
        }
        if self.agent.max_turns == 0 {
            return fail("agent.max_turns must be at least 1");
        }
        if self.agent.verify_k < 2 {
            return fail("agent.verify_k must be at least 2");
        }
        if self.agent.report_cap_tokens < 64 {
            return fail("agent.report_cap_tokens must be at least 64");
        }
        if !(0.0..=0.95).contains(&self.agent.compression_ratio) {
            return fail("agent.compression_ratio must be between 0.0 and 0.95");
        }
        if !(0.0..=0.95).contains(&self.drift.max_compression_ratio) {
            return fail("drift.max_compression_ratio must be between 0.0 and 0.95");
        }
        let in_unit = |v: f64| (-1.0..=1.0).contains(&v);
        if !in_unit(self.drift.warn_threshold) || !in_unit(self.drift.danger_threshold) {
            return fail("drift thresholds must be between -1.0 and 1.0");
        }
        if self.drift.danger_threshold > self.drift.warn_threshold {
            return fail("drift.danger_threshold must not exceed drift.warn_threshold");
        }
        if self.drift.max_verify_k < self.agent.verify_k {
            return fail("drift.max_verify_k must be at least agent.verify_k");
        }
        if !(1..=60).contains(&self.sandbox.timeout_secs) {
            return fail("sandbox.timeout_secs must be between 1 and 60");
        }
        if self.sandbox.output_cap_bytes == 0 || self.sandbox.output_cap_bytes > 64 * 1024 {
            return fail("sandbox.output_cap_bytes must be between 1 and 65536");
        }
        if !(1..=32).contains(&self.planner.concurrency_cap) {
            return fail("planner.concurrency_cap must be between 1 and 32");
        }
        if !(1..=4).contains(&self.planner.per_group_cap) {
            return fail("planner.per_group_cap must be between 1 and 4");
        }
        if self.delegation.max_parallel == 0 {
            return fail("delegation.max_parallel must be at least 1");
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: ModelConfig::default(),
            agent: LoopConfig::default(),
            verifier: VerifierConfig::default(),
            drift: DriftConfig::default(),
            delegation: DelegationConfig::default(),
            planner: PlannerConfig::default(),
            sandbox: SandboxConfig::default(),
            cas: CasConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_tool_calls, 128);
        assert_eq!(config.sandbox.output_cap_bytes, 65536);
        assert_eq!(config.delegation.agents["summarizer"].max_calls, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.primary, config.model.primary);
        assert_eq!(parsed.planner.tier1_dirs, config.planner.tier1_dirs);
        assert_eq!(parsed.verifier.validator, ValidatorSetting::Default);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_tool_calls = 10

[verifier]
validator = "disabled"

[delegation.agents.summarizer]
max_calls = 1
tokens_per_call = 300
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_tool_calls, 10);
        assert_eq!(config.agent.report_cap_tokens, 7000);
        assert_eq!(config.verifier.validator, ValidatorSetting::Disabled);
        assert_eq!(config.delegation.agents.len(), 1);
        assert_eq!(config.delegation.agents["summarizer"].tokens_per_call, 300);
    }

    #[test]
    fn sandbox_timeout_above_sixty_rejected() {
        let mut config = AppConfig::default();
        config.sandbox.timeout_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn verify_k_below_two_rejected() {
        let mut config = AppConfig::default();
        config.agent.verify_k = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_drift_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.drift.danger_threshold = 0.99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn per_group_cap_above_four_rejected() {
        let mut config = AppConfig::default();
        config.planner.per_group_cap = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agent = [").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.agent.call_timeout_secs, 60);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn tool_enablement_is_configurable() {
        let tools = ToolsConfig {
            enabled: vec!["read_file".into()],
        };
        assert!(tools.is_enabled("read_file"));
        assert!(!tools.is_enabled("run_sandbox"));
    }
}
