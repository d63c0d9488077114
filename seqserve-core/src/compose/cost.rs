use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::window::LengthIndex;
use crate::error::StageError;
use crate::stage::{Received, Stage, StageIo, Step};
use crate::task::Item;

/// Padding-aware composer.
///
/// Pending tasks are held in a [`LengthIndex`]. While the oldest task still
/// has slack the composer keeps accepting work; once `batch_size` tasks are
/// pending, or waiting would eat into the safety margin, it emits the window
/// of similar-length tasks with the least padding that fits under
/// `parallel_size`. When the oldest task is already overdue the chosen
/// window must contain it.
#[derive(Debug)]
pub struct CostComposer {
    batch_size: usize,
    timeout: Duration,
    margin: Duration,
    parallel_size: usize,
    pending: LengthIndex,
}

/// Where the oldest pending task stands against its wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slack {
    Remaining(Duration),
    Exhausted,
    Overdue,
}

impl CostComposer {
    pub fn new(batch_size: usize, timeout: Duration, margin: Duration, parallel_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            timeout,
            margin,
            parallel_size: parallel_size.max(1),
            pending: LengthIndex::new(),
        }
    }

    fn slack(&self, now: Instant) -> Slack {
        let oldest = self.pending.oldest().unwrap_or(now);
        let deadline = oldest + self.timeout.saturating_sub(self.margin);
        match deadline.checked_duration_since(now) {
            Some(left) if !left.is_zero() => Slack::Remaining(left),
            Some(_) => Slack::Exhausted,
            None => Slack::Overdue,
        }
    }

    /// Whether to wait for more work before composing.
    fn accepting(&self, slack: Slack, output_depth: usize) -> bool {
        matches!(slack, Slack::Remaining(_))
            || output_depth > 1
            || self.pending.len() * 4 < self.batch_size
    }

    async fn emit(&mut self, io: &StageIo, urgent: bool) -> Result<(), StageError> {
        let Some(window) = self.pending.best_window(self.parallel_size, urgent) else {
            return Ok(());
        };
        let batch = self.pending.take(window);
        let width = batch.iter().map(|t| t.len()).max().unwrap_or(0);

        tracing::debug!(
            size = batch.len(),
            width,
            cost = window.cost,
            urgent,
            remaining = self.pending.len(),
            "Emitting batch"
        );
        io.send(Item::Batch(batch)).await
    }
}

#[async_trait]
impl Stage for CostComposer {
    fn name(&self) -> &'static str {
        "compose-cost"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let slack = self.slack(Instant::now());
        let mut due = false;

        if self.accepting(slack, io.output_depth()) {
            let wait = if self.pending.is_empty() {
                None
            } else if let Slack::Remaining(left) = slack {
                Some(left)
            } else {
                Some(Duration::ZERO)
            };

            match io.recv_within(wait).await {
                Received::Item(Item::Task(task)) => self.pending.insert(task),
                Received::Item(other) => {
                    return Err(StageError::UnexpectedItem {
                        stage: self.name(),
                        expected: "task",
                        got: other.shape(),
                    })
                }
                Received::TimedOut => due = true,
                Received::Closed => {
                    while !self.pending.is_empty() {
                        self.emit(io, false).await?;
                    }
                    return Ok(Step::Finished);
                }
            }
        } else {
            due = true;
        }

        if !self.pending.is_empty() && (self.pending.len() >= self.batch_size || due) {
            self.emit(io, slack == Slack::Overdue).await?;
        }
        Ok(Step::Continue)
    }
}
