//! File read tool: read a line range of a workspace file with a citation.

use async_trait::async_trait;
use std::sync::Arc;
use veritas_core::error::ToolError;
use veritas_core::evidence::Evidence;
use veritas_core::tool::{Parameters, Tool, ToolResult};
use crate::workspace::Workspace;

/// Lines of context shown around the requested range.
pub const CONTEXT_LINES: usize = 3;

/// Lines returned when no range is given.
const DEFAULT_SPAN: usize = 200;

pub struct ReadFileTool {
    workspace: Arc<Workspace>,
    max_file_bytes: u64,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>, max_file_bytes: u64) -> Self {
        Self {
            workspace,
            max_file_bytes,
        }
    }
}

fn line_param(parameters: &Parameters, key: &str) -> Result<Option<usize>, ToolError> {
    match parameters.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|n| *n >= 1)
            .map(|n| Some(usize::try_from(n).unwrap_or(usize::MAX)))
            .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a positive integer"))),
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read lines of a file in the workspace. Returns numbered lines with a few lines of surrounding context."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to read (1-based)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to read (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, parameters: &Parameters) -> Result<ToolResult, ToolError> {
        let path = parameters
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let start = line_param(parameters, "start_line")?;
        let end = line_param(parameters, "end_line")?;

        let resolved = self.workspace.resolve(path)?;
        let relative = self.workspace.relative(&resolved);

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(ToolResult {
                    success: false,
                    output: format!("Failed to read file {relative}: {e}"),
                    ..ToolResult::default()
                });
            }
        };
        if bytes.len() as u64 > self.max_file_bytes {
            return Ok(ToolResult {
                success: false,
                output: format!(
                    "{relative} is {} bytes, over the {} byte limit; read a line range of a smaller file",
                    bytes.len(),
                    self.max_file_bytes
                ),
                ..ToolResult::default()
            });
        }

        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return Ok(ToolResult::ok(format!("{relative} is empty"), Vec::new()));
        }

        let start = start.unwrap_or(1);
        let end = end.unwrap_or(start.saturating_add(DEFAULT_SPAN - 1)).min(lines.len());
        if start > lines.len() || start > end {
            return Ok(ToolResult {
                success: false,
                output: format!("Line range {start}-{end} is outside {relative} ({} lines)", lines.len()),
                ..ToolResult::default()
            });
        }

        let shown_start = start.saturating_sub(CONTEXT_LINES).max(1);
        let shown_end = (end + CONTEXT_LINES).min(lines.len());
        let mut output = format!("{relative} (lines {start}-{end})\n");
        for n in shown_start..=shown_end {
            let marker = if (start..=end).contains(&n) { ' ' } else { '·' };
            output.push_str(&format!("{n:>5}{marker} {}\n", lines[n - 1]));
        }

        let snippet = lines[start - 1..end].join("\n");
        let mut citation = Evidence::file(&relative, start, snippet);
        if end > start {
            citation.location = format!("{relative}:{start}-{end}");
            citation.source_id = citation.location.clone();
        }

        Ok(ToolResult::ok(output, vec![citation]).with_data(serde_json::json!({
            "path": relative,
            "start_line": start,
            "end_line": end,
            "total_lines": lines.len(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, ReadFileTool) {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("f.txt"), body).unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let ws = Arc::new(Workspace::new(dir.path()).unwrap());
        (dir, ReadFileTool::new(ws, 256_000))
    }

    fn params(v: serde_json::Value) -> Parameters {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn tool_definition() {
        let (_dir, tool) = fixture();
        assert_eq!(tool.name(), "read_file");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert!(schema["properties"]["start_line"].is_object());
    }

    #[tokio::test]
    async fn huge_start_line_is_out_of_range() {
        let (_dir, tool) = fixture();
        let result = tool
            .execute(&params(serde_json::json!({"path": "f.txt", "start_line": u64::MAX})))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("outside f.txt (20 lines)"), "{}", result.output);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn range_with_context_and_citation() {
        let (_dir, tool) = fixture();
        let result = tool
            .execute(&params(serde_json::json!({"path": "f.txt", "start_line": 10, "end_line": 11})))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("line 7"));
        assert!(result.output.contains("line 14"));
        assert!(!result.output.contains("line 15"));
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].location, "f.txt:10-11");
        assert_eq!(result.citations[0].snippet, "line 10\nline 11");
        assert_eq!(result.citations[0].domain_or_file, "f.txt");
    }

    #[tokio::test]
    async fn single_line_citation() {
        let (_dir, tool) = fixture();
        let result = tool
            .execute(&params(serde_json::json!({"path": "f.txt", "start_line": 1, "end_line": 1})))
            .await
            .unwrap();
        assert_eq!(result.citations[0].location, "f.txt:1");
    }

    #[tokio::test]
    async fn out_of_range_is_a_soft_failure() {
        let (_dir, tool) = fixture();
        let result = tool
            .execute(&params(serde_json::json!({"path": "f.txt", "start_line": 50})))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_a_soft_failure() {
        let (_dir, tool) = fixture();
        let result = tool.execute(&params(serde_json::json!({"path": "nope.txt"}))).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Failed to read file"));
    }

    #[tokio::test]
    async fn empty_file() {
        let (_dir, tool) = fixture();
        let result = tool.execute(&params(serde_json::json!({"path": "empty.txt"}))).await.unwrap();
        assert!(result.success);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn traversal_blocked_and_bad_args_rejected() {
        let (_dir, tool) = fixture();
        let err = tool
            .execute(&params(serde_json::json!({"path": "../../../etc/passwd"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathOutsideWorkspace(_)));
        assert!(tool.execute(&Parameters::new()).await.is_err());
        assert!(
            tool.execute(&params(serde_json::json!({"path": "f.txt", "start_line": 0})))
                .await
                .is_err()
        );
    }
}
