use async_trait::async_trait;

use crate::error::StageError;
use crate::stage::{Stage, StageIo, Step};
use crate::task::Item;

/// Emits every task as a batch of one, immediately.
#[derive(Debug, Default)]
pub struct NaiveComposer;

#[async_trait]
impl Stage for NaiveComposer {
    fn name(&self) -> &'static str {
        "compose-naive"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let Some(task) = io.recv_task().await? else {
            return Ok(Step::Finished);
        };
        io.send(Item::Batch(vec![task])).await?;
        Ok(Step::Continue)
    }
}
