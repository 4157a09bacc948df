//! Provider trait: the abstraction over the language model.
//!
//! The model is an opaque oracle: a request carries a bounded message list
//! and tool schemas, a response carries free text and optionally the
//! structured tool calls the API surfaced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// A single model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (chosen per call by the model router)
    pub model: String,

    /// The bounded message list for this turn
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool schemas the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.85
}

impl ProviderRequest {
    /// A request without tools, as used by validators and delegates.
    pub fn plain(model: impl Into<String>, messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            max_tokens: None,
            tools: Vec::new(),
        }
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Free text content (may contain Thought/Action segments or JSON blocks)
    pub content: String,

    /// Structured tool calls, when the API surfaces them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

impl ProviderResponse {
    /// A plain-text response with no structured tool calls.
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
            model: model.into(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The model interface consumed by the orchestrator, delegates and the
/// verifier's validator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_request_has_no_tools() {
        let req = ProviderRequest::plain("gpt-4o", vec![Message::user("hi")], 0.1);
        assert!(req.tools.is_empty());
        assert!(req.max_tokens.is_none());
        assert!((req.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn request_temperature_defaults_when_missing() {
        let req: ProviderRequest =
            serde_json::from_str(r#"{"model":"m","messages":[]}"#).unwrap();
        assert!((req.temperature - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "search_code".into(),
            description: "Search the workspace".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("search_code"));
        assert!(json.contains("query"));
    }
}
