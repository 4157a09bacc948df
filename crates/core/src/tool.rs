//! Tool trait: the abstraction over research capabilities.
//!
//! Tools search code, read files, run sandboxed snippets and look up
//! literature. A tool returns a [`ToolResult`] carrying its raw output and
//! the citations it can vouch for; the orchestrator turns that into an
//! Observation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::{ErrorKind, ToolError};
use crate::evidence::{Evidence, Observation};
use crate::provider::ToolDefinition;

/// Tool parameters: a JSON object, keys unique by construction.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// A canonical request to execute a tool. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID within a turn
    pub call_id: String,

    /// Name of the tool to execute
    pub tool_name: String,

    /// Parameters as a JSON object
    pub parameters: Parameters,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            parameters,
        }
    }

    /// String parameter lookup.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Citations backing the output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Evidence>,

    /// Classification when the tool reports a soft failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(output: impl Into<String>, citations: Vec<Evidence>) -> Self {
        Self {
            success: true,
            output: output.into(),
            citations,
            ..Self::default()
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Turn this result into the observation for `call`.
    pub fn into_observation(self, call: &ToolCall) -> Observation {
        Observation {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            raw_output: self.output,
            citations: self.citations,
            success: self.success,
            error_kind: self.error_kind,
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_code").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, parameters: &Parameters) -> std::result::Result<ToolResult, ToolError>;

    /// Whether identical calls within a session may reuse a prior result.
    fn cacheable(&self) -> bool {
        false
    }

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The set of tools exposed to the model.
///
/// Its size depends entirely on configuration; nothing assumes a fixed count.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions, in name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.tool_name)
            .ok_or_else(|| ToolError::NotFound(call.tool_name.clone()))?;
        tool.execute(&call.parameters).await
    }

    /// Registered tool names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
