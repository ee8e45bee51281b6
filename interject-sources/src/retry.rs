//! Bounded retry queue for writes that failed while disconnected.
//!
//! Oldest-dropped policy: when the queue is full the oldest batch is
//! discarded and a counter is incremented. Flushing preserves FIFO order and
//! only removes a batch after the source accepted it, so a failed flush
//! retains everything still pending.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::source::PathUpdate;

pub struct RetryQueue {
    batches: Mutex<VecDeque<Vec<PathUpdate>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a failed batch, dropping the oldest batch when full.
    pub fn push(&self, batch: Vec<PathUpdate>) {
        let mut batches = self.batches.lock().expect("retry queue lock poisoned");
        if batches.len() >= self.capacity {
            batches.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "retry queue full, dropped oldest batch");
        }
        batches.push_back(batch);
    }

    /// The oldest pending batch, left in place until [`pop_front`](Self::pop_front).
    pub fn front(&self) -> Option<Vec<PathUpdate>> {
        self.batches
            .lock()
            .expect("retry queue lock poisoned")
            .front()
            .cloned()
    }

    pub fn pop_front(&self) {
        self.batches
            .lock()
            .expect("retry queue lock poisoned")
            .pop_front();
    }

    pub fn len(&self) -> usize {
        self.batches.lock().expect("retry queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of batches discarded by the oldest-drop policy.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
