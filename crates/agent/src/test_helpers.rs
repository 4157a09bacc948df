//! Shared test helpers: a scripted provider that records what it was sent.

use std::collections::VecDeque;
use std::sync::Mutex;
use veritas_core::error::ProviderError;
use veritas_core::message::MessageToolCall;
use veritas_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// Returns queued responses in order and records every request.
/// Once the script runs out every call fails with `NotConfigured`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn responses(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::responses(texts.iter().map(|t| text(t)).collect())
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())))
    }
}

/// A plain text response.
pub fn text(content: &str) -> ProviderResponse {
    ProviderResponse {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        ..ProviderResponse::text(content, "mock-model")
    }
}

/// A response carrying one structured tool call.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ProviderResponse {
    tool_calls(&[(id, name, arguments)])
}

pub fn tool_calls(calls: &[(&str, &str, serde_json::Value)]) -> ProviderResponse {
    ProviderResponse {
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| MessageToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            })
            .collect(),
        ..text("Thought: gathering evidence")
    }
}
