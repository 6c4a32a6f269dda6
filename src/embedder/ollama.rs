//! Ollama-based embedding client implementation.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Embedder;
use crate::error::{PipelineError, Result};

/// Blocking embeddings client that talks to a local Ollama `/api/embed` endpoint.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
    batch_size: usize,
}

impl OllamaEmbedder {
    /// Builds a new embeddings client.
    pub fn new(
        base_url: &str,
        model: String,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(PipelineError::invocation("missing embedding model name"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PipelineError::from_transport("failed to build embedding client", err))?;
        let endpoint = format!("{}/api/embed", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }

    /// Maximum batch size configured for this client.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Model identifier requested from the runtime.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

impl Embedder for OllamaEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(PipelineError::invocation(format!(
                "batch of {} exceeds configured max {}",
                inputs.len(),
                self.batch_size
            )));
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbedRequest {
                model: &self.model,
                input: inputs,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbedResponse = resp.json().map_err(|err| {
                            PipelineError::invocation(format!(
                                "failed to parse embedding response: {err}"
                            ))
                        })?;
                        if parsed.embeddings.len() != inputs.len() {
                            return Err(PipelineError::invocation(format!(
                                "runtime returned {} embeddings for {} inputs",
                                parsed.embeddings.len(),
                                inputs.len()
                            )));
                        }
                        debug!(count = inputs.len(), model = %self.model, "embedded batch");
                        return Ok(parsed.embeddings);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if self.should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "embedding request failed; retrying");
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(PipelineError::invocation(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if self.is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "embedding endpoint unreachable; retrying");
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(PipelineError::from_transport(
                        "failed to call embedding endpoint",
                        err,
                    ));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
