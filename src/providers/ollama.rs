use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LlmProvider, ProviderRequest};
use crate::error::{PipelineError, Result};

const SYSTEM_PROMPT: &str =
    "You are a careful clinical assistant. Answer with a single JSON object and nothing else.";

/// Chat client for a locally running Ollama daemon.
pub struct OllamaChat {
    endpoint: String,
    model: String,
    client: Client,
}

impl OllamaChat {
    /// Builds a client for `{base_url}/api/chat` with a per-request timeout.
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(PipelineError::invocation("missing chat model name"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PipelineError::from_transport("failed to build chat client", err))?;
        Ok(Self {
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model,
            client,
        })
    }
}

impl LlmProvider for OllamaChat {
    fn invoke(&self, request: &ProviderRequest<'_>) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| PipelineError::from_transport("failed to call local model", err))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PipelineError::invocation(format!(
                "model returned {status}: {text}"
            )));
        }
        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| PipelineError::from_transport("failed to parse model response", err))?;
        let answer = parsed.message.content;
        if answer.trim().is_empty() {
            return Err(PipelineError::invocation("model response missing text content"));
        }
        debug!(model = %self.model, chars = answer.len(), "model answered");
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    options: ChatOptions,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}
