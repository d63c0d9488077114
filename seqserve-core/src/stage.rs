//! The pipeline stage abstraction.
//!
//! A stage owns one step of the processing: it pulls items from its input
//! channel, transforms them and pushes the result to its output channel.
//! The [`Pipeline`](crate::pipeline::Pipeline) wires the channels and runs
//! every stage as its own tokio task.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StageError;
use crate::task::{Item, Task};

/// Outcome of a single processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The input channel is closed and nothing more will arrive.
    Finished,
}

/// Outcome of a bounded wait on the input channel.
#[derive(Debug)]
pub enum Received {
    Item(Item),
    TimedOut,
    Closed,
}

/// The channel ends a stage works with.
pub struct StageIo {
    stage: &'static str,
    input: mpsc::Receiver<Item>,
    output: mpsc::Sender<Item>,
}

impl StageIo {
    pub fn new(stage: &'static str, input: mpsc::Receiver<Item>, output: mpsc::Sender<Item>) -> Self {
        Self {
            stage,
            input,
            output,
        }
    }

    /// Wait for the next item with no deadline. `None` means the input is closed.
    pub async fn recv(&mut self) -> Option<Item> {
        self.input.recv().await
    }

    /// Wait for the next item for at most `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Received {
        match tokio::time::timeout(wait, self.input.recv()).await {
            Ok(Some(item)) => Received::Item(item),
            Ok(None) => Received::Closed,
            Err(_) => Received::TimedOut,
        }
    }

    /// Wait for the next item, bounded by `wait` if given.
    pub async fn recv_within(&mut self, wait: Option<Duration>) -> Received {
        match wait {
            Some(wait) => self.recv_timeout(wait).await,
            None => match self.recv().await {
                Some(item) => Received::Item(item),
                None => Received::Closed,
            },
        }
    }

    /// Wait for the next item and require it to be a single task.
    pub async fn recv_task(&mut self) -> Result<Option<Task>, StageError> {
        match self.recv().await {
            Some(Item::Task(task)) => Ok(Some(task)),
            Some(other) => Err(StageError::UnexpectedItem {
                stage: self.stage,
                expected: "task",
                got: other.shape(),
            }),
            None => Ok(None),
        }
    }

    /// Wait for the next item and require it to be a batch.
    pub async fn recv_batch(&mut self) -> Result<Option<Vec<Task>>, StageError> {
        match self.recv().await {
            Some(Item::Batch(batch)) => Ok(Some(batch)),
            Some(other) => Err(StageError::UnexpectedItem {
                stage: self.stage,
                expected: "batch",
                got: other.shape(),
            }),
            None => Ok(None),
        }
    }

    pub async fn send(&self, item: Item) -> Result<(), StageError> {
        self.output
            .send(item)
            .await
            .map_err(|_| StageError::OutputClosed(self.stage))
    }

    /// Number of items waiting on this stage's output channel.
    pub fn output_depth(&self) -> usize {
        queue_depth(&self.output)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }
}

pub(crate) fn queue_depth(sender: &mpsc::Sender<Item>) -> usize {
    sender.max_capacity() - sender.capacity()
}

/// One link of the pipeline.
#[async_trait]
pub trait Stage: Send {
    /// Short name used in logs and queue-depth reports.
    fn name(&self) -> &'static str;

    /// One-time setup run before the first step.
    async fn before_start(&mut self) {}

    /// Process one unit of work.
    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError>;
}

/// Run a stage until its input closes or a step fails.
pub async fn run_stage(mut stage: Box<dyn Stage>, mut io: StageIo) -> Result<(), StageError> {
    stage.before_start().await;
    tracing::debug!(stage = stage.name(), "Stage started");

    loop {
        match stage.step(&mut io).await? {
            Step::Continue => {}
            Step::Finished => break,
        }
    }

    tracing::debug!(stage = stage.name(), "Stage finished");
    Ok(())
}
