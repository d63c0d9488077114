//! Request/response front end over an asynchronous pipeline.
//!
//! A [`Processor`] owns a [`Pipeline`] whose first stage encodes text and
//! whose last stage decodes it back. Callers submit a payload and wait on a
//! one-shot slot keyed by the task id; a background collector drains the
//! pipeline exit and resolves slots as tasks come out, in whatever order
//! the batches finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ProcessError, Result};
use crate::model::SequenceModel;
use crate::pending::PendingTable;
use crate::pipeline::{Pipeline, PipelineHealth, QueueDepth, DEFAULT_QUEUE_CAPACITY};
use crate::stage::Stage;
use crate::stages::{Decoder, Encoder, Flattener, ModelApplier};
use crate::stats::{BatchStats, BatchStatsSnapshot};
use crate::task::{Item, Payload, Task, TaskIdGenerator};

/// Default ceiling on requests admitted but not yet answered.
pub const DEFAULT_PENDING_CAPACITY: usize = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Requests beyond this many in flight are rejected up front.
    pub pending_capacity: usize,
    /// Capacity of every inter-stage channel.
    pub queue_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

struct Inner {
    pipeline: Pipeline,
    collector: Option<JoinHandle<()>>,
}

pub struct Processor {
    inner: Mutex<Inner>,
    entry: mpsc::Sender<Item>,
    pending: Arc<PendingTable>,
    ids: TaskIdGenerator,
    health: watch::Receiver<PipelineHealth>,
    stats: Arc<BatchStats>,
}

impl Processor {
    /// Wrap `stages` between an [`Encoder`] and a [`Decoder`].
    pub fn new(stages: Vec<Box<dyn Stage>>, config: ProcessorConfig) -> Result<Self> {
        Self::with_stats(stages, config, Arc::new(BatchStats::new()))
    }

    /// The standard model pipeline: encode, compose, apply the model,
    /// flatten, decode.
    pub fn for_model(
        composer: Box<dyn Stage>,
        model: Arc<dyn SequenceModel>,
        config: ProcessorConfig,
    ) -> Result<Self> {
        let stats = Arc::new(BatchStats::new());
        let stages: Vec<Box<dyn Stage>> = vec![
            composer,
            Box::new(ModelApplier::new(model, stats.clone())),
            Box::new(Flattener),
        ];
        Self::with_stats(stages, config, stats)
    }

    fn with_stats(
        stages: Vec<Box<dyn Stage>>,
        config: ProcessorConfig,
        stats: Arc<BatchStats>,
    ) -> Result<Self> {
        let mut chain: Vec<Box<dyn Stage>> = Vec::with_capacity(stages.len() + 2);
        chain.push(Box::new(Encoder));
        chain.extend(stages);
        chain.push(Box::new(Decoder));

        let pipeline = Pipeline::new(chain, config.queue_capacity)?;
        let entry = pipeline.entry();
        let health = pipeline.subscribe();

        Ok(Self {
            inner: Mutex::new(Inner {
                pipeline,
                collector: None,
            }),
            entry,
            pending: Arc::new(PendingTable::new(config.pending_capacity)),
            ids: TaskIdGenerator::new(),
            health,
            stats,
        })
    }

    /// Start the stages and the completion collector. A processor can only
    /// be started once.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let exit = inner
            .pipeline
            .take_exit()
            .ok_or(ProcessError::AlreadyStarted)?;

        let health = inner.pipeline.subscribe();
        inner.pipeline.start()?;
        inner.collector = Some(tokio::spawn(collect(exit, self.pending.clone(), health)));

        tracing::info!(
            stages = inner.pipeline.len(),
            pending_capacity = self.pending.capacity(),
            "Processor started"
        );
        Ok(())
    }

    /// Stop the stages and the collector. Waiting callers fail with
    /// [`ProcessError::NotRunning`].
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.pipeline.stop();
        if let Some(collector) = inner.collector.take() {
            collector.abort();
        }
        let dropped = self.pending.clear().await;
        tracing::info!(dropped, "Processor stopped");
    }

    /// Run `payload` through the pipeline and wait up to `timeout` for the
    /// result.
    pub async fn submit(&self, payload: Payload, timeout: Duration) -> Result<Payload> {
        let deadline = Instant::now() + timeout;
        self.ensure_running()?;

        let id = self.ids.next_id();
        let Some(slot) = self.pending.admit(id).await else {
            tracing::warn!(
                task_id = %id,
                capacity = self.pending.capacity(),
                "Pending table full, rejecting request"
            );
            return Err(ProcessError::AdmissionOverflow);
        };
        tracing::debug!(task_id = %id, len = payload.len(), "New task");

        let mut health = self.health.clone();
        let task = Task::new(id, payload);
        let outcome = tokio::time::timeout_at(deadline, async {
            if self.entry.send(Item::Task(task)).await.is_err() {
                return None;
            }
            tokio::select! {
                result = slot => result.ok(),
                _ = health.wait_for(|h| !matches!(h, PipelineHealth::Running)) => None,
            }
        })
        .await;

        match outcome {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                self.pending.abandon(id).await;
                Err(self.unavailable())
            }
            Err(_) => {
                self.pending.abandon(id).await;
                tracing::warn!(task_id = %id, ?timeout, "Request timed out");
                Err(ProcessError::RequestTimeout(timeout))
            }
        }
    }

    /// Submit a text query and return the decoded text.
    pub async fn process_query(&self, query: &str, timeout: Duration) -> Result<String> {
        match self.submit(Payload::Text(query.to_string()), timeout).await? {
            Payload::Text(text) => Ok(text),
            other => Err(ProcessError::UnexpectedPayload {
                expected: "text",
                got: other.kind(),
            }),
        }
    }

    pub fn health(&self) -> PipelineHealth {
        self.health.borrow().clone()
    }

    /// Resolves once a stage has failed, with the failed state.
    pub async fn wait_for_failure(&self) -> PipelineHealth {
        let mut health = self.health.clone();
        // an error means the pipeline is gone; report whatever it last said
        let _ = health.wait_for(PipelineHealth::is_failed).await;
        let state = health.borrow().clone();
        state
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.len().await
    }

    pub async fn queue_depths(&self) -> Vec<QueueDepth> {
        self.inner.lock().await.pipeline.queue_depths()
    }

    pub fn batch_stats(&self) -> BatchStatsSnapshot {
        self.stats.snapshot()
    }

    fn ensure_running(&self) -> Result<()> {
        match &*self.health.borrow() {
            PipelineHealth::Running => Ok(()),
            PipelineHealth::Failed { stage, reason } => {
                Err(ProcessError::PipelineFailed(format!("{}: {}", stage, reason)))
            }
            PipelineHealth::Idle | PipelineHealth::Stopped => Err(ProcessError::NotRunning),
        }
    }

    /// Error for a caller whose slot vanished without a result.
    fn unavailable(&self) -> ProcessError {
        match self.ensure_running() {
            Err(e) => e,
            Ok(()) => ProcessError::NotRunning,
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        if let Some(collector) = self.inner.get_mut().collector.take() {
            collector.abort();
        }
    }
}

/// Drain the pipeline exit, handing each finished task to its caller.
async fn collect(
    mut exit: mpsc::Receiver<Item>,
    pending: Arc<PendingTable>,
    mut health: watch::Receiver<PipelineHealth>,
) {
    loop {
        tokio::select! {
            item = exit.recv() => match item {
                Some(Item::Task(task)) => deliver(&pending, task).await,
                Some(Item::Batch(batch)) => {
                    for task in batch {
                        deliver(&pending, task).await;
                    }
                }
                None => break,
            },
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
                let failed = health.borrow_and_update().is_failed();
                if failed {
                    break;
                }
            }
        }
    }

    // the exit closes only after some stage has ended
    let _ = health.wait_for(|h| *h != PipelineHealth::Running).await;
    let failed = health.borrow().is_failed();
    if failed {
        let dropped = pending.clear().await;
        tracing::error!(dropped, "Pipeline failed, dropping pending requests");
    }
    tracing::debug!("Collector finished");
}

async fn deliver(pending: &PendingTable, task: Task) {
    let id = task.id;
    if !pending.resolve(id, task.payload).await {
        tracing::debug!(task_id = %id, "Discarding result of abandoned task");
    }
}
