//! Sandboxed snippet execution.
//!
//! Snippets run as a child process in a throwaway directory with:
//! - a wall-clock timeout (the child's whole process group is killed and
//!   the run reports exit code -9)
//! - a combined stdout+stderr cap; overflow is truncated and flagged
//! - a fixed RNG seed (`SANDBOX_SEED`, `PYTHONHASHSEED`, seeded `random`)
//! - a cleared environment (only `PATH` survives) and proxies pointed at
//!   an unroutable address, so library HTTP clients fail fast
//!
//! Isolation is process-level only; this is not a security boundary
//! against hostile code.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};
use veritas_config::SandboxConfig;
use veritas_core::error::{ErrorKind, ToolError};
use veritas_core::evidence::{Evidence, EvidenceKind};
use veritas_core::tool::{Parameters, Tool, ToolResult};

/// Exit code reported when the child was killed on timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -9;

/// How long to keep draining pipes after the child exits or is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const UNROUTABLE_PROXY: &str = "http://127.0.0.1:9";

/// Snippet language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetLanguage {
    Python,
    Shell,
}

impl SnippetLanguage {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Self::Python),
            "sh" | "shell" | "bash" => Some(Self::Shell),
            _ => None,
        }
    }
}

/// Result of one sandboxed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

impl SandboxOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Captured>>, stream: Stream, cap: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let used = captured.stdout.len() + captured.stderr.len();
        let room = cap.saturating_sub(used);
        if n > room {
            captured.truncated = true;
        }
        let keep = &chunk[..n.min(room)];
        match stream {
            Stream::Stdout => captured.stdout.extend_from_slice(keep),
            Stream::Stderr => captured.stderr.extend_from_slice(keep),
        }
    }
}

/// SIGKILL every process in the child's group.
#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group id is the child's pid,
    // set by `process_group(0)` at spawn, and the child is not yet reaped.
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        warn!(error = %std::io::Error::last_os_error(), "Failed to kill snippet process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &tokio::process::Child) {}

fn python_prelude(seed: u64) -> String {
    format!(
        "import json as _json, os as _os, random as _random\n\
         _random.seed({seed})\n\
         try:\n    import numpy as _np\n    _np.random.seed({seed})\n\
         except Exception:\n    pass\n\
         try:\n    SANDBOX_INPUT = _json.loads(_os.environ.get('SANDBOX_INPUT', '{{}}'))\n\
         except Exception:\n    SANDBOX_INPUT = {{}}\n"
    )
}

/// Runs snippets under fixed limits.
#[derive(Debug, Clone)]
pub struct Sandbox {
    timeout: Duration,
    output_cap: usize,
    seed: u64,
    python: String,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            output_cap: config.output_cap_bytes,
            seed: config.seed,
            python: config.python.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_cap(mut self, cap: usize) -> Self {
        self.output_cap = cap;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `code`. Only spawn failures are errors; timeouts, non-zero exits
    /// and overflow are reported in the outcome.
    pub async fn run(
        &self,
        code: &str,
        language: SnippetLanguage,
        input: Option<&serde_json::Value>,
    ) -> Result<SandboxOutcome, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "run_sandbox".into(),
            reason,
        };

        let scratch = tempfile::tempdir().map_err(|e| failed(format!("scratch dir: {e}")))?;
        let (program, script_name, script) = match language {
            SnippetLanguage::Python => (
                self.python.as_str(),
                "snippet.py",
                format!("{}{code}\n", python_prelude(self.seed)),
            ),
            SnippetLanguage::Shell => ("sh", "snippet.sh", format!("{code}\n")),
        };
        let script_path = scratch.path().join(script_name);
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|e| failed(format!("write snippet: {e}")))?;

        let input_json = input.map_or_else(|| "{}".to_string(), |v| v.to_string());
        let path_var = std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into());
        let seed = self.seed.to_string();

        let mut command = Command::new(program);
        command
            .arg(&script_path)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", path_var)
            .env("HOME", scratch.path())
            .env("TMPDIR", scratch.path())
            .env("SANDBOX_SEED", &seed)
            .env("PYTHONHASHSEED", &seed)
            .env("PYTHONIOENCODING", "UTF-8")
            .env("PYTHONUNBUFFERED", "1")
            .env("SANDBOX_INPUT", input_json)
            .env("http_proxy", UNROUTABLE_PROXY)
            .env("https_proxy", UNROUTABLE_PROXY)
            .env("HTTP_PROXY", UNROUTABLE_PROXY)
            .env("HTTPS_PROXY", UNROUTABLE_PROXY)
            .env("no_proxy", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down grandchildren too.
        #[cfg(unix)]
        command.process_group(0);

        debug!(language = ?language, timeout_secs = self.timeout.as_secs(), "Starting sandboxed snippet");
        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| failed(format!("spawn {program}: {e}")))?;

        let sink = Arc::new(Mutex::new(Captured::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(drain(out, sink.clone(), Stream::Stdout, self.output_cap)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(drain(err, sink.clone(), Stream::Stderr, self.output_cap)));
        }

        let (exit_code, timed_out) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
            Ok(Err(e)) => return Err(failed(format!("wait: {e}"))),
            Err(_) => {
                kill_process_group(&child);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out snippet");
                }
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        // Grandchildren may still hold the pipes open.
        for mut reader in readers {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        let duration_ms = started.elapsed().as_millis() as u64;

        let captured = std::mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner));
        let outcome = SandboxOutcome {
            exit_code,
            stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
            timed_out,
            truncated: captured.truncated,
            duration_ms,
        };

        if timed_out {
            warn!(duration_ms, "Sandboxed snippet timed out");
        } else {
            info!(exit_code, duration_ms, truncated = outcome.truncated, "Sandboxed snippet finished");
        }
        Ok(outcome)
    }
}

fn render(outcome: &SandboxOutcome, cap: usize) -> String {
    let mut out = format!("exit_code: {}\n", outcome.exit_code);
    if outcome.timed_out {
        out.push_str("[timed out; process killed]\n");
    }
    out.push_str("--- stdout ---\n");
    out.push_str(&outcome.stdout);
    if !outcome.stdout.ends_with('\n') && !outcome.stdout.is_empty() {
        out.push('\n');
    }
    if !outcome.stderr.is_empty() {
        out.push_str("--- stderr ---\n");
        out.push_str(&outcome.stderr);
        if !outcome.stderr.ends_with('\n') {
            out.push('\n');
        }
    }
    if outcome.truncated {
        out.push_str(&format!("[output truncated at {cap} bytes]\n"));
    }
    out
}

/// `run_sandbox`: execute a Python or shell snippet.
pub struct RunSandboxTool {
    sandbox: Sandbox,
}

impl RunSandboxTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for RunSandboxTool {
    fn name(&self) -> &str {
        "run_sandbox"
    }

    fn description(&self) -> &str {
        "Run a short Python or shell snippet in a scratch directory with a timeout and a fixed random seed. Returns exit code, stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Source code to run"
                },
                "language": {
                    "type": "string",
                    "enum": ["python", "sh"],
                    "description": "Snippet language (default python)"
                },
                "input": {
                    "type": "object",
                    "description": "JSON value exposed to the snippet as SANDBOX_INPUT"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, parameters: &Parameters) -> Result<ToolResult, ToolError> {
        let code = parameters
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' parameter".into()))?;
        let language = match parameters.get("language").and_then(|v| v.as_str()) {
            None => SnippetLanguage::Python,
            Some(s) => SnippetLanguage::parse(s)
                .ok_or_else(|| ToolError::InvalidArguments(format!("Unsupported language '{s}'")))?,
        };

        let outcome = self.sandbox.run(code, language, parameters.get("input")).await?;
        let output = render(&outcome, self.sandbox.output_cap);

        let error_kind = if outcome.timed_out {
            Some(ErrorKind::SandboxTimeout)
        } else if outcome.truncated {
            Some(ErrorKind::SandboxOverflow)
        } else if outcome.exit_code != 0 {
            Some(ErrorKind::ToolPermanent)
        } else {
            None
        };

        let citations = if outcome.succeeded() {
            vec![Evidence {
                source_id: format!("sandbox:{}", veritas_cas::content_hash(code.as_bytes())),
                snippet: outcome.stdout.trim().chars().take(400).collect(),
                location: "sandbox".into(),
                domain_or_file: "sandbox".into(),
                kind: EvidenceKind::Execution,
                symbol: None,
            }]
        } else {
            Vec::new()
        };

        Ok(ToolResult {
            success: outcome.succeeded(),
            output,
            citations,
            error_kind,
            data: serde_json::to_value(&outcome).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(&SandboxConfig::default())
    }

    fn params(v: serde_json::Value) -> Parameters {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn language_parsing() {
        assert_eq!(SnippetLanguage::parse("Python"), Some(SnippetLanguage::Python));
        assert_eq!(SnippetLanguage::parse("bash"), Some(SnippetLanguage::Shell));
        assert_eq!(SnippetLanguage::parse("ruby"), None);
    }

    #[test]
    fn prelude_seeds_rng() {
        let prelude = python_prelude(42);
        assert!(prelude.contains("_random.seed(42)"));
        assert!(prelude.contains("SANDBOX_INPUT"));
    }

    #[tokio::test]
    async fn shell_snippet_runs() {
        let outcome = sandbox().run("echo hello", SnippetLanguage::Shell, None).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn environment_is_cleared_and_seeded() {
        let outcome = sandbox()
            .run(
                "printf '%s %s' \"${CARGO_MANIFEST_DIR:-cleared}\" \"$SANDBOX_SEED\"",
                SnippetLanguage::Shell,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "cleared 1337");
    }

    #[tokio::test]
    async fn input_is_passed_through() {
        let input = serde_json::json!({"n": 3});
        let outcome = sandbox()
            .run("printf '%s' \"$SANDBOX_INPUT\"", SnippetLanguage::Shell, Some(&input))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, r#"{"n":3}"#);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let outcome = sandbox()
            .run("echo oops >&2; exit 3", SnippetLanguage::Shell, None)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stderr.trim(), "oops");
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let sandbox = sandbox().with_timeout(Duration::from_millis(300));
        let outcome = sandbox.run("sleep 5", SnippetLanguage::Shell, None).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(outcome.duration_ms < 5000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_grandchildren() {
        let scratch = tempfile::tempdir().unwrap();
        let marker = scratch.path().join("survived");
        let code = format!("sh -c 'sleep 1; touch {}'", marker.display());
        let sandbox = sandbox().with_timeout(Duration::from_millis(300));
        let outcome = sandbox.run(&code, SnippetLanguage::Shell, None).await.unwrap();
        assert!(outcome.timed_out);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "grandchild kept running after the timeout");
    }

    #[tokio::test]
    async fn output_over_cap_is_truncated() {
        let sandbox = sandbox().with_output_cap(1024);
        let outcome = sandbox
            .run("yes aaaaaaaa | head -c 5000", SnippetLanguage::Shell, None)
            .await
            .unwrap();
        assert!(outcome.truncated);
        assert!(outcome.stdout.len() + outcome.stderr.len() <= 1024);
    }

    #[tokio::test]
    async fn tool_classifies_timeouts() {
        let tool = RunSandboxTool::new(sandbox().with_timeout(Duration::from_millis(300)));
        let result = tool
            .execute(&params(serde_json::json!({"code": "sleep 5", "language": "sh"})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SandboxTimeout));
        assert!(result.output.contains("exit_code: -9"));
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn tool_success_carries_execution_citation() {
        let tool = RunSandboxTool::new(sandbox());
        let result = tool
            .execute(&params(serde_json::json!({"code": "echo 42", "language": "sh"})))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].kind, EvidenceKind::Execution);
        assert_eq!(result.citations[0].snippet, "42");
        assert_eq!(result.data.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn tool_rejects_bad_arguments() {
        let tool = RunSandboxTool::new(sandbox());
        assert!(tool.execute(&Parameters::new()).await.is_err());
        assert!(
            tool.execute(&params(serde_json::json!({"code": "1", "language": "cobol"})))
                .await
                .is_err()
        );
    }
}
