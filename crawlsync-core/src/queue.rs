use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use models::EventRecord;

/// Unbounded FIFO shared by every producer and the single dispatcher.
///
/// `append` and `take_one` each hold the lock exactly once, so a batch lands
/// contiguously and in order.
#[derive(Debug, Default)]
pub struct EventQueue {
    records: Mutex<VecDeque<EventRecord>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventRecord>> {
        // A panic elsewhere cannot leave the deque half-updated.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, records: Vec<EventRecord>) {
        if records.is_empty() {
            return;
        }
        self.lock().extend(records);
    }

    /// Oldest record, or `None` when empty. Never blocks on emptiness.
    pub fn take_one(&self) -> Option<EventRecord> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
