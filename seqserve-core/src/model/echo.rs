//! A stand-in model that echoes its input after a length-dependent delay.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ModelError, SequenceModel};

/// Returns every batch unchanged, sleeping roughly as long as a real
/// sequence-to-sequence model would for the same batch shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EchoModel {
    /// Seconds per padded position per parallel pass.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Positions the model can process in one parallel pass.
    #[serde(default = "default_parallel_size")]
    pub parallel_size: usize,
    /// Fixed per-call overhead in seconds.
    #[serde(default = "default_delay")]
    pub default_delay: f64,
}

fn default_alpha() -> f64 {
    0.01
}
fn default_parallel_size() -> usize {
    1000
}
fn default_delay() -> f64 {
    0.05
}

impl Default for EchoModel {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            parallel_size: default_parallel_size(),
            default_delay: default_delay(),
        }
    }
}

impl EchoModel {
    /// An echo model with no simulated latency.
    pub fn instant() -> Self {
        Self {
            alpha: 0.0,
            parallel_size: default_parallel_size(),
            default_delay: 0.0,
        }
    }

    /// Reject parameters that would make every batch fail.
    pub fn validate(&self) -> Result<(), ModelError> {
        check_seconds("alpha", self.alpha)?;
        check_seconds("default_delay", self.default_delay)?;
        if self.parallel_size == 0 {
            return Err(ModelError::Load("parallel_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Simulated processing time for a batch of `count` rows of width `max_len`.
    pub fn latency(&self, count: usize, max_len: usize) -> Result<Duration, ModelError> {
        let total = count.saturating_mul(max_len);
        let passes = total.div_ceil(self.parallel_size.max(1));
        let secs = self.alpha * max_len.saturating_mul(passes) as f64 + self.default_delay;
        Duration::try_from_secs_f64(secs.max(0.0))
            .map_err(|e| ModelError::Inference(format!("simulated latency of {}s: {}", secs, e)))
    }
}

/// Upper bound for `alpha` and `default_delay`, in seconds.
const MAX_SECONDS: f64 = 3600.0;

fn check_seconds(field: &str, value: f64) -> Result<(), ModelError> {
    if !value.is_finite() || !(0.0..=MAX_SECONDS).contains(&value) {
        return Err(ModelError::Load(format!(
            "{} must be between 0 and {} seconds, got {}",
            field, MAX_SECONDS, value
        )));
    }
    Ok(())
}

#[async_trait]
impl SequenceModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn process(&self, batch: Vec<Vec<i32>>) -> Result<Vec<Vec<i32>>, ModelError> {
        let max_len = batch.iter().map(Vec::len).max().unwrap_or(0);
        let delay = self.latency(batch.len(), max_len)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(batch)
    }
}
