//! Text <-> token conversion at the pipeline edges.

use async_trait::async_trait;

use crate::error::StageError;
use crate::stage::{Stage, StageIo, Step};
use crate::task::{Item, Payload};

/// Map every character to its code point.
pub fn encode(text: &str) -> Vec<i32> {
    text.chars().map(|ch| ch as i32).collect()
}

/// Inverse of [`encode`]. Padding and values that are not characters are dropped.
pub fn decode(tokens: &[i32]) -> String {
    tokens
        .iter()
        .filter(|&&token| token >= 0)
        .filter_map(|&token| char::from_u32(token as u32))
        .collect()
}

/// Turns text payloads into token sequences.
#[derive(Debug, Default)]
pub struct Encoder;

#[async_trait]
impl Stage for Encoder {
    fn name(&self) -> &'static str {
        "encode"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let Some(mut task) = io.recv_task().await? else {
            return Ok(Step::Finished);
        };
        task.payload = match task.payload {
            Payload::Text(text) => Payload::Tokens(encode(&text)),
            other => {
                return Err(StageError::UnexpectedPayload {
                    stage: self.name(),
                    expected: "text",
                    got: other.kind(),
                })
            }
        };
        io.send(Item::Task(task)).await?;
        Ok(Step::Continue)
    }
}

/// Turns token sequences back into text.
#[derive(Debug, Default)]
pub struct Decoder;

#[async_trait]
impl Stage for Decoder {
    fn name(&self) -> &'static str {
        "decode"
    }

    async fn step(&mut self, io: &mut StageIo) -> Result<Step, StageError> {
        let Some(mut task) = io.recv_task().await? else {
            return Ok(Step::Finished);
        };
        task.payload = match task.payload {
            Payload::Tokens(tokens) => Payload::Text(decode(&tokens)),
            other => {
                return Err(StageError::UnexpectedPayload {
                    stage: self.name(),
                    expected: "tokens",
                    got: other.kind(),
                })
            }
        };
        io.send(Item::Task(task)).await?;
        Ok(Step::Continue)
    }
}
