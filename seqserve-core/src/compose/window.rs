//! Pending tasks indexed by arrival and by length, and the padding-aware
//! window search over them.
//!
//! Tasks live in a vector kept sorted by `(length, id)`; since ids grow with
//! arrival, equal lengths stay in arrival order. A second ordered map keyed
//! by `(created_at, id)` finds the oldest task. Both indexes are owned by a
//! single composer, so neither needs synchronisation.

use std::collections::BTreeMap;
use std::ops::Range;

use tokio::time::Instant;

use crate::task::{Task, TaskId};

/// A contiguous run of the length-sorted tasks and the padding it adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    /// Padding positions added while growing the window from its seed group.
    pub cost: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// How many tasks of `width` fit under `parallel_size`.
fn fit(parallel_size: usize, width: usize) -> usize {
    if width == 0 {
        usize::MAX
    } else {
        parallel_size / width
    }
}

#[derive(Debug, Default)]
pub struct LengthIndex {
    by_len: Vec<Task>,
    by_time: BTreeMap<(Instant, TaskId), usize>,
}

impl LengthIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_len.is_empty()
    }

    pub fn insert(&mut self, task: Task) {
        let key = (task.len(), task.id);
        let position = self.by_len.partition_point(|t| (t.len(), t.id) < key);
        self.by_time.insert((task.created_at, task.id), key.0);
        self.by_len.insert(position, task);
    }

    /// Creation time of the oldest pending task.
    pub fn oldest(&self) -> Option<Instant> {
        self.by_time.keys().next().map(|(created_at, _)| *created_at)
    }

    /// Position of the oldest pending task in length order.
    pub fn oldest_position(&self) -> Option<usize> {
        let (&(_, id), &len) = self.by_time.iter().next()?;
        Some(self.by_len.partition_point(|t| (t.len(), t.id) < (len, id)))
    }

    /// Lengths in sorted order.
    pub fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_len.iter().map(Task::len)
    }

    fn length_at(&self, position: usize) -> usize {
        self.by_len[position].len()
    }

    /// First position holding a task of length `len` or longer.
    fn group_start(&self, len: usize) -> usize {
        self.by_len.partition_point(|t| t.len() < len)
    }

    /// First position holding a task longer than `len`.
    fn group_end(&self, len: usize) -> usize {
        self.by_len.partition_point(|t| t.len() <= len)
    }

    /// Remove the tasks in `window` from both indexes, in length order.
    pub fn take(&mut self, window: Window) -> Vec<Task> {
        let batch: Vec<Task> = self.by_len.drain(window.range()).collect();
        for task in &batch {
            self.by_time.remove(&(task.created_at, task.id));
        }
        batch
    }

    /// Pick the cheapest window to emit.
    ///
    /// Candidates are seeded at each length group in turn. When `urgent` is
    /// set the scan starts at the oldest task and stops as soon as a
    /// candidate would no longer contain it.
    pub fn best_window(&self, parallel_size: usize, urgent: bool) -> Option<Window> {
        if self.is_empty() {
            return None;
        }
        let anchor = if urgent { self.oldest_position() } else { None };

        let mut best: Option<Window> = None;
        let mut cursor = anchor.unwrap_or(0);
        while cursor < self.len() {
            let window = self.window_around(cursor, parallel_size);
            if anchor.is_some_and(|anchor| window.start > anchor) {
                break;
            }
            if best.map_or(true, |b| window.cost < b.cost) {
                best = Some(window);
            }
            cursor = window.end.max(self.group_end(self.length_at(cursor)));
        }
        best
    }

    /// Seed a window with the equal-length group around `position`, capped
    /// to what fits, then grow it.
    pub fn window_around(&self, position: usize, parallel_size: usize) -> Window {
        let len = self.length_at(position);
        let cap = fit(parallel_size, len).max(1);

        let mut start = self.group_start(len);
        if position + 1 - start > cap {
            start = position + 1 - cap;
        }
        let end = self.group_end(len).min(start.saturating_add(cap));

        self.expand(start, end, parallel_size)
    }

    /// Greedily extend `start..end` one length group at a time, taking the
    /// side that adds less padding, until neither side fits.
    fn expand(&self, mut start: usize, mut end: usize, parallel_size: usize) -> Window {
        let mut cost = 0;

        loop {
            let count = end - start;
            let width = self.length_at(end - 1);

            // shorter tasks pad up to the current width
            let left = (start > 0).then(|| {
                let len = self.length_at(start - 1);
                let room = fit(parallel_size, width).saturating_sub(count);
                let take = (start - self.group_start(len)).min(room);
                (take, (width - len) * take)
            });

            // longer tasks make every current member pad further
            let right = (end < self.len()).then(|| {
                let len = self.length_at(end);
                let room = fit(parallel_size, len).saturating_sub(count);
                let take = (self.group_end(len) - end).min(room);
                (take, count * (len - width))
            });

            let left = left.filter(|&(take, _)| take > 0);
            let right = right.filter(|&(take, _)| take > 0);

            match (left, right) {
                (Some((take, l_cost)), Some((_, r_cost))) if l_cost <= r_cost => {
                    start -= take;
                    cost += l_cost;
                }
                (_, Some((take, r_cost))) => {
                    end += take;
                    cost += r_cost;
                }
                (Some((take, l_cost)), None) => {
                    start -= take;
                    cost += l_cost;
                }
                (None, None) => break,
            }
        }

        Window { start, end, cost }
    }
}
