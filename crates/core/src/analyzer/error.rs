use crate::llm::error::ModelError;
use thiserror::Error;

/// Why a batch (and therefore a run) did not complete.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model call failed: {0}")]
    ModelCall(#[from] ModelError),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),

    #[error("ticker catalog unavailable: {0:#}")]
    Catalog(anyhow::Error),

    #[error("run cancelled before the batch was dispatched")]
    Cancelled,

    #[error("batch task panicked: {0}")]
    TaskPanicked(String),
}

impl PipelineError {
    /// Stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ModelCall(ModelError::RateLimited { .. }) => "rate_limited",
            PipelineError::ModelCall(_) => "model_call",
            PipelineError::MalformedPayload(_) => "malformed_payload",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Catalog(_) => "catalog",
            PipelineError::Cancelled => "cancelled",
            PipelineError::TaskPanicked(_) => "task_panicked",
        }
    }
}
