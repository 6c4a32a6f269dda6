//! Error kinds raised by pipeline stages.

use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures that can surface while driving a sig through the pipeline.
///
/// Only [`PipelineError::IndexUnavailable`] is fatal to a run; every other
/// variant is recorded against the offending row and processing continues.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The backing index was never built or could not be loaded.
    #[error("index unavailable at {}: {reason}", path.display())]
    IndexUnavailable {
        /// Location the index was expected at.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The local model (or embedding endpoint) could not be reached in time.
    #[error("model unavailable: {reason}")]
    ModelUnavailable {
        /// Underlying transport error.
        reason: String,
    },

    /// The model answered, but not with something usable.
    #[error("model invocation failed: {message}")]
    ModelInvocation {
        /// Underlying error message.
        message: String,
    },

    /// Model output did not satisfy the expected schema.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A query was issued with arguments no index can answer.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Knowledge-base entries were malformed.
    #[error("classification error: {0}")]
    Classification(String),
}

impl PipelineError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IndexUnavailable { .. })
    }

    pub(crate) fn schema(reason: impl Into<String>) -> Self {
        Self::SchemaViolation(reason.into())
    }

    pub(crate) fn invocation(message: impl Into<String>) -> Self {
        Self::ModelInvocation {
            message: message.into(),
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            reason: reason.into(),
        }
    }

    /// Classifies a transport error the way the invoker contract requires.
    pub(crate) fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::unavailable(format!("{context}: {err}"))
        } else {
            Self::invocation(format!("{context}: {err}"))
        }
    }
}
