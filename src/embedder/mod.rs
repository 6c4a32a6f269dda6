//! Text embedding clients.

pub mod ollama;

use crate::error::{PipelineError, Result};

pub use ollama::OllamaEmbedder;

/// Turns text into dense vectors.
pub trait Embedder {
    /// Embeds every input, returning vectors in input order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single string.
    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[input])?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::invocation("embedding response was empty"))
    }
}
