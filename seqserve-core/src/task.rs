//! Units of work flowing through the pipeline.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

/// Identity of a task, unique for the lifetime of the generator that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues strictly increasing task ids.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: AtomicU64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TaskId {
        TaskId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Data carried by a task. Stages rewrite it in place as it moves along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Tokens(Vec<i32>),
}

impl Payload {
    /// Length the batch composers sort and pad by.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.chars().count(),
            Payload::Tokens(tokens) => tokens.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Tokens(_) => "tokens",
        }
    }
}

/// A single request travelling through the pipeline.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub payload: Payload,
    pub created_at: Instant,
}

impl Task {
    pub fn new(id: TaskId, payload: Payload) -> Self {
        Self {
            id,
            payload,
            created_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// What travels over an inter-stage channel.
#[derive(Debug)]
pub enum Item {
    Task(Task),
    Batch(Vec<Task>),
}

impl Item {
    pub fn shape(&self) -> &'static str {
        match self {
            Item::Task(_) => "task",
            Item::Batch(_) => "batch",
        }
    }
}
