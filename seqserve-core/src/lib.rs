//! Staged inference pipeline with padding-aware batch composition.
//!
//! Requests enter a [`Processor`], are encoded into token sequences, grouped
//! into batches by one of the [`compose`] stages, run through a
//! [`SequenceModel`], split back into single tasks and decoded. Every stage
//! runs as its own tokio task connected to its neighbours by bounded
//! channels; results find their way back to the caller by task id.

pub mod compose;
pub mod error;
pub mod model;
pub mod pending;
pub mod pipeline;
pub mod processor;
pub mod stage;
pub mod stages;
pub mod stats;
pub mod task;

pub use compose::{BatchSettings, BatchStrategy};
pub use error::{PipelineError, ProcessError, StageError};
pub use model::{load_model, EchoModel, ModelError, SequenceModel};
pub use pipeline::{Pipeline, PipelineHealth, QueueDepth};
pub use processor::{Processor, ProcessorConfig};
pub use stage::{Stage, StageIo, Step};
pub use stats::BatchStatsSnapshot;
pub use task::{Payload, Task, TaskId};
