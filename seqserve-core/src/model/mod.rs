//! Sequence model abstraction.
//!
//! The pipeline treats the model as a black box that takes a batch of
//! equal-width padded token sequences and returns one output row per input
//! row, in the same order.

mod echo;
mod loader;

pub use echo::EchoModel;
pub use loader::{load_model, ModelDescriptor};

use async_trait::async_trait;

/// Value used to pad sequences up to the batch width.
pub const PAD_TOKEN: i32 = -1;

/// Errors from loading or running a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unable to load model: {0}")]
    Load(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model returned {got} rows for a batch of {expected}")]
    Shape { expected: usize, got: usize },
}

/// A model that processes padded batches of token sequences.
#[async_trait]
pub trait SequenceModel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Process one batch. Every row has the same length.
    async fn process(&self, batch: Vec<Vec<i32>>) -> Result<Vec<Vec<i32>>, ModelError>;
}
