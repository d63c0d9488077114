//! Applies the model to composed batches.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StageError;
use crate::model::{ModelError, SequenceModel, PAD_TOKEN};
use crate::stage::{Stage, StageIo, Step};
use crate::stats::BatchStats;
use crate::task::{Item, Payload};

/// Pads each batch to its widest member, runs the model and writes every
/// output row back into the task it came from.
pub struct ModelApplier {
    model: Arc<dyn SequenceModel>,
    stats: Arc<BatchStats>,
}

impl ModelApplier {
    pub fn new(model: Arc<dyn SequenceModel>, stats: Arc<BatchStats>) -> Self {
        Self { model, stats }
    }
}

#[async_trait]
impl Stage for ModelApplier {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let Some(mut batch) = io.recv_batch().await? else {
            return Ok(Step::Finished);
        };

        let mut rows = Vec::with_capacity(batch.len());
        for task in &mut batch {
            match std::mem::replace(&mut task.payload, Payload::Tokens(Vec::new())) {
                Payload::Tokens(tokens) => rows.push(tokens),
                other => {
                    return Err(StageError::UnexpectedPayload {
                        stage: self.name(),
                        expected: "tokens",
                        got: other.kind(),
                    })
                }
            }
        }

        let lengths: Vec<usize> = rows.iter().map(Vec::len).collect();
        let width = lengths.iter().copied().max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, PAD_TOKEN);
        }

        let outputs = self.model.process(rows).await?;
        if outputs.len() != batch.len() {
            return Err(ModelError::Shape {
                expected: batch.len(),
                got: outputs.len(),
            }
            .into());
        }

        self.stats.record(&lengths);
        tracing::debug!(
            model = self.model.name(),
            size = batch.len(),
            width,
            "Applied model to batch"
        );

        for (task, output) in batch.iter_mut().zip(outputs) {
            task.payload = Payload::Tokens(output);
        }
        io.send(Item::Batch(batch)).await?;
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EchoModel;
    use crate::task::{Task, TaskIdGenerator};
    use tokio::sync::mpsc;

    /// Drops the last row of every batch.
    struct Lossy;

    #[async_trait]
    impl SequenceModel for Lossy {
        fn name(&self) -> &str {
            "lossy"
        }

        async fn process(&self, mut batch: Vec<Vec<i32>>) -> Result<Vec<Vec<i32>>, ModelError> {
            batch.pop();
            Ok(batch)
        }
    }

    fn token_task(ids: &TaskIdGenerator, tokens: Vec<i32>) -> Task {
        Task::new(ids.next_id(), Payload::Tokens(tokens))
    }

    #[tokio::test]
    async fn test_pads_batch_to_widest_member() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let mut io = StageIo::new("model", in_rx, out_tx);
        let stats = Arc::new(BatchStats::new());
        let mut stage = ModelApplier::new(Arc::new(EchoModel::instant()), stats.clone());
        let ids = TaskIdGenerator::new();

        let batch = vec![token_task(&ids, vec![1, 2, 3]), token_task(&ids, vec![4])];
        in_tx.send(Item::Batch(batch)).await.unwrap();
        stage.step(&mut io).await.unwrap();

        let Item::Batch(out) = out_rx.recv().await.unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(out[0].payload, Payload::Tokens(vec![1, 2, 3]));
        assert_eq!(out[1].payload, Payload::Tokens(vec![4, PAD_TOKEN, PAD_TOKEN]));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches, 1);
        assert_eq!(snapshot.padding_tokens, 2);
    }

    #[tokio::test]
    async fn test_cardinality_mismatch_fails_stage() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let mut io = StageIo::new("model", in_rx, out_tx);
        let mut stage = ModelApplier::new(Arc::new(Lossy), Arc::new(BatchStats::new()));
        let ids = TaskIdGenerator::new();

        let batch = vec![token_task(&ids, vec![1]), token_task(&ids, vec![2])];
        in_tx.send(Item::Batch(batch)).await.unwrap();

        let err = stage.step(&mut io).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Model(ModelError::Shape { expected: 2, got: 1 })
        ));
    }
}
