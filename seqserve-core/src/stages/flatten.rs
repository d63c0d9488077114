use async_trait::async_trait;

use crate::error::StageError;
use crate::stage::{Stage, StageIo, Step};
use crate::task::Item;

/// Splits each batch back into its tasks, preserving order.
#[derive(Debug, Default)]
pub struct Flattener;

#[async_trait]
impl Stage for Flattener {
    fn name(&self) -> &'static str {
        "flatten"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let Some(batch) = io.recv_batch().await? else {
            return Ok(Step::Finished);
        };
        for task in batch {
            io.send(Item::Task(task)).await?;
        }
        Ok(Step::Continue)
    }
}
