//! Error types for the processing pipeline.

use crate::model::ModelError;

/// Failure inside a single stage's processing step.
///
/// Any of these is fatal to the pipeline: the stage stops and the pipeline
/// is reported as failed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Stage {stage} expected a {expected}, got a {got}")]
    UnexpectedItem {
        stage: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Stage {stage} expected {expected} payload, got {got}")]
    UnexpectedPayload {
        stage: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Stage {0} output channel closed")]
    OutputClosed(&'static str),

    #[error("Model failed: {0}")]
    Model(#[from] ModelError),

    #[error("Stage panicked: {0}")]
    Panicked(String),
}

/// Errors building or starting a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline has no stages")]
    Empty,

    #[error("Pipeline already started")]
    AlreadyStarted,
}

/// Errors returned to callers of the processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Queue is full, try requesting later")]
    AdmissionOverflow,

    #[error("Request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("Pipeline failed: {0}")]
    PipelineFailed(String),

    #[error("Processor is not running")]
    NotRunning,

    #[error("Processor already started")]
    AlreadyStarted,

    #[error("Expected {expected} result, got {got}")]
    UnexpectedPayload {
        expected: &'static str,
        got: &'static str,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
