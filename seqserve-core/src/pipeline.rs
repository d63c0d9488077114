//! Chains stages through bounded channels and runs them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{PipelineError, StageError};
use crate::stage::{queue_depth, run_stage, Stage, StageIo};
use crate::task::Item;

/// Default capacity of every inter-stage channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Lifecycle state of a pipeline, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineHealth {
    Idle,
    Running,
    Failed { stage: &'static str, reason: String },
    Stopped,
}

impl PipelineHealth {
    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineHealth::Failed { .. })
    }
}

/// Number of items buffered on a stage's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub stage: &'static str,
    pub depth: usize,
}

/// Watches a stage's input without keeping the channel open.
struct QueueGauge {
    stage: &'static str,
    input: mpsc::WeakSender<Item>,
}

/// A sequence of stages where each stage's output feeds the next one's input.
///
/// Channels are created when the pipeline is built, so the entry sender and
/// the exit receiver are usable before [`Pipeline::start`].
pub struct Pipeline {
    entry: mpsc::Sender<Item>,
    exit: Option<mpsc::Receiver<Item>>,
    unstarted: Vec<(Box<dyn Stage>, StageIo)>,
    gauges: Vec<QueueGauge>,
    handles: Vec<JoinHandle<()>>,
    health: Arc<watch::Sender<PipelineHealth>>,
}

impl Pipeline {
    /// Chain `stages` in the order given.
    pub fn new(stages: Vec<Box<dyn Stage>>, queue_capacity: usize) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        let capacity = queue_capacity.max(1);

        let (entry, mut input) = mpsc::channel(capacity);
        let mut input_sender = entry.clone();
        let mut unstarted = Vec::with_capacity(stages.len());
        let mut gauges = Vec::with_capacity(stages.len());

        for stage in stages {
            let (output, next_input) = mpsc::channel(capacity);
            gauges.push(QueueGauge {
                stage: stage.name(),
                input: input_sender.downgrade(),
            });
            input_sender = output.clone();

            let io = StageIo::new(stage.name(), input, output);
            unstarted.push((stage, io));
            input = next_input;
        }

        let (health, _) = watch::channel(PipelineHealth::Idle);

        Ok(Self {
            entry,
            exit: Some(input),
            unstarted,
            gauges,
            handles: Vec::new(),
            health: Arc::new(health),
        })
    }

    /// Sender feeding the first stage.
    pub fn entry(&self) -> mpsc::Sender<Item> {
        self.entry.clone()
    }

    /// Receiver draining the last stage. Can be taken once.
    pub fn take_exit(&mut self) -> Option<mpsc::Receiver<Item>> {
        self.exit.take()
    }

    /// Subscribe to health changes.
    pub fn subscribe(&self) -> watch::Receiver<PipelineHealth> {
        self.health.subscribe()
    }

    pub fn health(&self) -> PipelineHealth {
        self.health.borrow().clone()
    }

    /// Spawn every stage as its own task.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.unstarted.is_empty() {
            return Err(PipelineError::AlreadyStarted);
        }

        for (stage, io) in self.unstarted.drain(..) {
            let name = stage.name();
            let health = self.health.clone();
            let handle = tokio::spawn(async move {
                let outcome = AssertUnwindSafe(run_stage(stage, io)).catch_unwind().await;
                let failure = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e,
                    Err(panic) => StageError::Panicked(panic_message(panic.as_ref())),
                };

                tracing::error!(stage = name, error = %failure, "Stage failed, stopping pipeline");
                let reason = failure.to_string();
                health.send_if_modified(|state| {
                    if state.is_failed() {
                        return false;
                    }
                    *state = PipelineHealth::Failed {
                        stage: name,
                        reason: reason.clone(),
                    };
                    true
                });
            });
            self.handles.push(handle);
        }

        self.health.send_replace(PipelineHealth::Running);
        tracing::info!(stages = self.gauges.len(), "Pipeline started");
        Ok(())
    }

    /// Abort every stage. Items in flight are dropped.
    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.health.send_if_modified(|state| {
            if state.is_failed() || *state == PipelineHealth::Stopped {
                return false;
            }
            *state = PipelineHealth::Stopped;
            true
        });
    }

    /// Items buffered on each stage's input, in pipeline order.
    pub fn queue_depths(&self) -> Vec<QueueDepth> {
        self.gauges
            .iter()
            .map(|gauge| QueueDepth {
                stage: gauge.stage,
                depth: gauge.input.upgrade().map_or(0, |input| queue_depth(&input)),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
