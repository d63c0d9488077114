use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StageError;
use crate::stage::{Received, Stage, StageIo, Step};
use crate::task::{Item, Task};

/// Fills a batch until it reaches `batch_size` or its oldest member has
/// waited `timeout - margin`, whichever comes first.
#[derive(Debug)]
pub struct TimeoutComposer {
    batch_size: usize,
    timeout: Duration,
    margin: Duration,
    batch: Vec<Task>,
    oldest: Instant,
}

impl TimeoutComposer {
    pub fn new(batch_size: usize, timeout: Duration, margin: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            timeout,
            margin,
            batch: Vec::new(),
            oldest: Instant::now(),
        }
    }

    /// Time left before the open batch must go out. `None` once it is due.
    fn slack(&self, now: Instant) -> Option<Duration> {
        let deadline = self.oldest + self.timeout.saturating_sub(self.margin);
        deadline
            .checked_duration_since(now)
            .filter(|slack| !slack.is_zero())
    }

    async fn flush(&mut self, io: &StageIo) -> Result<(), StageError> {
        let batch = std::mem::take(&mut self.batch);
        self.oldest = Instant::now();
        tracing::debug!(size = batch.len(), "Emitting batch");
        io.send(Item::Batch(batch)).await
    }
}

#[async_trait]
impl Stage for TimeoutComposer {
    fn name(&self) -> &'static str {
        "compose-timeout"
    }

    async fn before_start(&mut self) {
        self.batch.clear();
        self.oldest = Instant::now();
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let slack = self.slack(Instant::now());
        let mut due = false;

        if slack.is_some() || self.batch.is_empty() {
            let wait = if self.batch.is_empty() { None } else { slack };
            match io.recv_within(wait).await {
                Received::Item(Item::Task(task)) => {
                    if self.batch.is_empty() || task.created_at < self.oldest {
                        self.oldest = task.created_at;
                    }
                    self.batch.push(task);
                }
                Received::Item(other) => {
                    return Err(StageError::UnexpectedItem {
                        stage: self.name(),
                        expected: "task",
                        got: other.shape(),
                    })
                }
                Received::TimedOut => due = true,
                Received::Closed => {
                    if !self.batch.is_empty() {
                        self.flush(io).await?;
                    }
                    return Ok(Step::Finished);
                }
            }
        } else {
            due = true;
        }

        if !self.batch.is_empty() && (self.batch.len() >= self.batch_size || due) {
            self.flush(io).await?;
        }
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::run_stage;
    use crate::task::{Payload, TaskIdGenerator};
    use tokio::sync::mpsc;

    struct Harness {
        input: mpsc::Sender<Item>,
        output: mpsc::Receiver<Item>,
        ids: TaskIdGenerator,
    }

    impl Harness {
        fn spawn(composer: TimeoutComposer) -> Self {
            let (input, in_rx) = mpsc::channel(64);
            let (out_tx, output) = mpsc::channel(64);
            let io = StageIo::new("compose-timeout", in_rx, out_tx);
            tokio::spawn(run_stage(Box::new(composer), io));
            Self {
                input,
                output,
                ids: TaskIdGenerator::new(),
            }
        }

        async fn submit(&self, len: usize) {
            let task = Task::new(self.ids.next_id(), Payload::Tokens(vec![1; len]));
            self.input.send(Item::Task(task)).await.unwrap();
        }

        async fn next_batch(&mut self) -> Vec<Task> {
            match self.output.recv().await.unwrap() {
                Item::Batch(batch) => batch,
                other => panic!("unexpected {}", other.shape()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_emitted_without_waiting() {
        let timeout = Duration::from_secs(1);
        let mut harness = Harness::spawn(TimeoutComposer::new(4, timeout, timeout / 4));
        let start = Instant::now();

        for _ in 0..4 {
            harness.submit(3).await;
        }
        let batch = harness.next_batch().await;

        assert_eq!(batch.len(), 4);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_task_emitted_at_deadline() {
        let timeout = Duration::from_secs(1);
        let mut harness = Harness::spawn(TimeoutComposer::new(10, timeout, timeout / 4));
        let start = Instant::now();

        harness.submit(3).await;
        let batch = harness.next_batch().await;

        assert_eq!(batch.len(), 1);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(740), "waited {:?}", waited);
        assert!(waited <= timeout, "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_preserve_arrival_order() {
        let timeout = Duration::from_secs(1);
        let mut harness = Harness::spawn(TimeoutComposer::new(3, timeout, timeout / 4));

        for len in [9, 1, 5, 2] {
            harness.submit(len).await;
        }
        let first = harness.next_batch().await;
        let second = harness.next_batch().await;

        let ids: Vec<u64> = first.iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_input_flushes_open_batch() {
        let timeout = Duration::from_secs(60);
        let mut harness = Harness::spawn(TimeoutComposer::new(10, timeout, timeout / 4));

        harness.submit(1).await;
        harness.submit(2).await;
        drop(harness.input);

        let batch = match harness.output.recv().await.unwrap() {
            Item::Batch(batch) => batch,
            other => panic!("unexpected {}", other.shape()),
        };
        assert_eq!(batch.len(), 2);
        assert!(harness.output.recv().await.is_none());
    }
}
