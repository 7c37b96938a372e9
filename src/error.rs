//! Error taxonomy for the digest pipeline.
//!
//! The pipeline distinguishes four error *kinds*, not a flat list of concrete
//! failure types: `TransientExternal` (retryable), `MalformedInput`
//! (non-retryable, recorded and skipped), `Rejected` (an expected outcome,
//! not a failure), and `Fatal` (terminates the run). Every error carries
//! enough to answer "is this retryable" without the caller inspecting
//! variants by hand.

use thiserror::Error;

/// Pipeline-wide error type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient failure in {source_name}: {message}")]
    TransientExternal { source_name: String, message: String },

    #[error("malformed input in {context}: {message}")]
    MalformedInput { context: String, message: String },

    #[error("rejected: {reason}")]
    Rejected { reason: String },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("ai provider error: {0}")]
    Ai(#[from] crate::pipeline::ai::AiError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether retrying the operation that produced this error is worthwhile.
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::TransientExternal { .. } => true,
            PipelineError::Ai(e) => e.retryable,
            PipelineError::MalformedInput { .. }
            | PipelineError::Rejected { .. }
            | PipelineError::Fatal(_)
            | PipelineError::Cache(_)
            | PipelineError::Json(_) => false,
        }
    }

    /// Coarse kind, useful for metrics labels and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::TransientExternal { .. } => "transient_external",
            PipelineError::MalformedInput { .. } => "malformed_input",
            PipelineError::Rejected { .. } => "rejected",
            PipelineError::Fatal(_) => "fatal",
            PipelineError::Cache(_) => "cache",
            PipelineError::Ai(_) => "ai",
            PipelineError::Json(_) => "json",
        }
    }

    pub fn transient(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientExternal {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        let e = PipelineError::transient("feed", "timed out");
        assert!(e.retryable());
        assert_eq!(e.kind(), "transient_external");
    }

    #[test]
    fn malformed_is_not_retryable() {
        let e = PipelineError::malformed("feed", "bad xml");
        assert!(!e.retryable());
    }

    #[test]
    fn fatal_is_not_retryable() {
        let e = PipelineError::Fatal("user not found".into());
        assert!(!e.retryable());
    }
}
