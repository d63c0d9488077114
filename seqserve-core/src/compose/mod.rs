//! Batch composition stages.
//!
//! Each composer turns a stream of single tasks into a stream of non-empty
//! batches:
//!
//! - [`NaiveComposer`] wraps every task in its own batch.
//! - [`TimeoutComposer`] fills a batch up to `batch_size`, emitting early
//!   when the oldest member is about to exceed its wait budget.
//! - [`CostComposer`] keeps every pending task indexed by length and emits
//!   the window that wastes the least padding under the `parallel_size`
//!   capacity, never starving the oldest task.

mod cost;
mod naive;
mod timeout;
mod window;

pub use cost::CostComposer;
pub use naive::NaiveComposer;
pub use timeout::TimeoutComposer;
pub use window::{LengthIndex, Window};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Default fraction of the wait timeout reserved for downstream work by
/// the timeout composer.
pub const DEFAULT_SIMPLE_MARGIN: f64 = 0.25;

/// Default safety fraction for the cost composer.
pub const DEFAULT_COST_MARGIN: f64 = 0.1;

/// Which composer to put in front of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchStrategy {
    Naive,
    Simple,
    #[default]
    CostBased,
}

impl std::fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStrategy::Naive => write!(f, "Naive"),
            BatchStrategy::Simple => write!(f, "Simple"),
            BatchStrategy::CostBased => write!(f, "CostBased"),
        }
    }
}

/// Parameters shared by the composers.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub strategy: BatchStrategy,
    pub batch_size: usize,
    /// Longest a task should wait before being batched.
    pub wait_timeout: Duration,
    /// Upper bound on `batch count x max length`.
    pub parallel_size: usize,
    /// Fraction of `wait_timeout` kept in reserve by [`TimeoutComposer`].
    pub simple_margin: f64,
    /// Fraction of `wait_timeout` kept in reserve by [`CostComposer`].
    pub cost_margin: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::default(),
            batch_size: 64,
            wait_timeout: Duration::from_secs(4),
            parallel_size: 1000,
            simple_margin: DEFAULT_SIMPLE_MARGIN,
            cost_margin: DEFAULT_COST_MARGIN,
        }
    }
}

impl BatchSettings {
    /// Build the composer stage selected by `strategy`.
    pub fn build(&self) -> Box<dyn Stage> {
        match self.strategy {
            BatchStrategy::Naive => Box::new(NaiveComposer),
            BatchStrategy::Simple => Box::new(TimeoutComposer::new(
                self.batch_size,
                self.wait_timeout,
                self.wait_timeout.mul_f64(self.simple_margin),
            )),
            BatchStrategy::CostBased => Box::new(CostComposer::new(
                self.batch_size,
                self.wait_timeout,
                self.wait_timeout.mul_f64(self.cost_margin),
                self.parallel_size,
            )),
        }
    }
}
