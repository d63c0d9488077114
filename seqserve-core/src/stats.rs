//! Running counters for the batches applied to the model.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free batch counters shared between the model stage and observers.
#[derive(Debug, Default)]
pub struct BatchStats {
    batches: AtomicU64,
    tasks: AtomicU64,
    useful_tokens: AtomicU64,
    padding_tokens: AtomicU64,
}

/// Point-in-time copy of [`BatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchStatsSnapshot {
    pub batches: u64,
    pub tasks: u64,
    pub useful_tokens: u64,
    pub padding_tokens: u64,
    pub avg_batch_size: f64,
    pub padding_overhead: f64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch given the unpadded length of each member.
    pub fn record(&self, lengths: &[usize]) {
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        let useful: usize = lengths.iter().sum();
        let padding = max_len * lengths.len() - useful;

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.tasks.fetch_add(lengths.len() as u64, Ordering::Relaxed);
        self.useful_tokens.fetch_add(useful as u64, Ordering::Relaxed);
        self.padding_tokens.fetch_add(padding as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BatchStatsSnapshot {
        let batches = self.batches.load(Ordering::Relaxed);
        let tasks = self.tasks.load(Ordering::Relaxed);
        let useful_tokens = self.useful_tokens.load(Ordering::Relaxed);
        let padding_tokens = self.padding_tokens.load(Ordering::Relaxed);

        let avg_batch_size = if batches == 0 {
            0.0
        } else {
            tasks as f64 / batches as f64
        };
        let total = useful_tokens + padding_tokens;
        let padding_overhead = if total == 0 {
            0.0
        } else {
            padding_tokens as f64 / total as f64
        };

        BatchStatsSnapshot {
            batches,
            tasks,
            useful_tokens,
            padding_tokens,
            avg_batch_size,
            padding_overhead,
        }
    }
}
