//! Local language-model invocation.

mod ollama;

use crate::error::Result;

pub use ollama::OllamaChat;

/// Trait implemented by concrete model runtimes.
///
/// One call is one blocking request. Implementations must not retry behind
/// the caller's back: a timeout or refused connection surfaces as
/// [`crate::PipelineError::ModelUnavailable`], anything else as
/// [`crate::PipelineError::ModelInvocation`].
pub trait LlmProvider {
    /// Sends the prompt and returns the raw completion text.
    fn invoke(&self, request: &ProviderRequest<'_>) -> Result<String>;

    /// Short label used in logs.
    fn name(&self) -> &str;
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Fully composed prompt.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
}

impl<'a> ProviderRequest<'a> {
    /// Wraps `prompt` with the given sampling settings.
    pub fn new(prompt: &'a str, temperature: f32, max_tokens: usize) -> Self {
        Self {
            prompt,
            temperature,
            max_tokens,
        }
    }
}
