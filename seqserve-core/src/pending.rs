//! Completion slots for requests that are in the pipeline.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use crate::task::{Payload, TaskId};

/// Maps task ids to the one-shot sender their caller is waiting on.
///
/// Admission checks and inserts under one lock; resolution looks up and
/// removes under one lock, so at most one party ever takes a given slot.
#[derive(Debug)]
pub struct PendingTable {
    capacity: usize,
    slots: Mutex<HashMap<TaskId, oneshot::Sender<Payload>>>,
}

impl PendingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a slot for `id`. Returns `None` without touching the table
    /// when it is already full.
    pub async fn admit(&self, id: TaskId) -> Option<oneshot::Receiver<Payload>> {
        let mut slots = self.slots.lock().await;
        if slots.len() >= self.capacity {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(id, tx);
        Some(rx)
    }

    /// Hand `payload` to whoever waits on `id`. Returns false if nobody does.
    pub async fn resolve(&self, id: TaskId, payload: Payload) -> bool {
        let slot = self.slots.lock().await.remove(&id);
        match slot {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Give up on `id`, e.g. after its caller timed out.
    pub async fn abandon(&self, id: TaskId) -> bool {
        self.slots.lock().await.remove(&id).is_some()
    }

    /// Drop every slot; waiting callers see their channel close.
    pub async fn clear(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let dropped = slots.len();
        slots.clear();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}
