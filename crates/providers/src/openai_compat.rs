//! OpenAI-compatible model client.
//!
//! Works with OpenRouter, OpenAI, vLLM, Ollama and any endpoint exposing
//! `/v1/chat/completions` with function calling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use veritas_core::error::ProviderError;
use veritas_core::message::{Message, MessageToolCall, Role};
use veritas_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};

/// An OpenAI-compatible chat completions client.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a client; `timeout` bounds every HTTP request.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// OpenRouter endpoint.
    pub fn openrouter(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, timeout)
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: None,
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    fn map_status(status: u16, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited { retry_after_secs: 5 },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            404 => ProviderError::ModelNotFound(body),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(Self::map_status(status, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        parse_response(api_response)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

fn parse_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| MessageToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    Ok(ProviderResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
        model: api_response.model,
    })
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test", Duration::from_secs(5)).unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider =
            OpenAiCompatProvider::new("local", "http://localhost:8000/v1/", "", Duration::from_secs(5))
                .unwrap();
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn request_body_includes_tools_only_when_present() {
        let mut request = ProviderRequest::plain("m", vec![Message::user("hi")], 0.1);
        let body = OpenAiCompatProvider::request_body(&request);
        assert!(body.get("tools").is_none());

        request.tools.push(ToolDefinition {
            name: "search_code".into(),
            description: "Search".into(),
            parameters: serde_json::json!({"type": "object"}),
        });
        request.max_tokens = Some(256);
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "search_code");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            OpenAiCompatProvider::map_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            OpenAiCompatProvider::map_status(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        let err = OpenAiCompatProvider::map_status(503, "down".into());
        assert!(err.is_transient());
    }

    #[test]
    fn response_with_structured_tool_calls() {
        let raw = serde_json::json!({
            "model": "m",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"src/lib.rs\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = parse_response(api).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "read_file");
        assert_eq!(response.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let api: ApiResponse =
            serde_json::from_value(serde_json::json!({"model": "m", "choices": []})).unwrap();
        assert!(parse_response(api).is_err());
    }
}
