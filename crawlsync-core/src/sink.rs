use std::sync::Arc;

use models::{EventKind, EventRecord, Stat, StoreEntry};
use tracing::trace;
use utilities::NotificationCallback;

use crate::queue::EventQueue;

/// Callback registered with the store. Converts batches into queued records.
///
/// Holds nothing but the queue handle; the queue's lock makes concurrent
/// batches safe.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    queue: Arc<EventQueue>,
}

impl NotificationSink {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        NotificationSink { queue }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn added(&self, path: &str, stat: Stat) {
        self.on_batch(Vec::new(), vec![StoreEntry::new(path, Some(stat))], Vec::new());
    }

    pub fn updated(&self, path: &str, stat: Stat) {
        self.on_batch(vec![StoreEntry::new(path, Some(stat))], Vec::new(), Vec::new());
    }

    pub fn removed(&self, path: &str) {
        self.on_batch(Vec::new(), Vec::new(), vec![StoreEntry::removed(path)]);
    }
}

impl NotificationCallback for NotificationSink {
    fn on_batch(&self, updated: Vec<StoreEntry>, added: Vec<StoreEntry>, removed: Vec<StoreEntry>) {
        let mut records = Vec::with_capacity(updated.len() + added.len() + removed.len());
        records.extend(
            updated
                .into_iter()
                .map(|e| EventRecord::from_entry(EventKind::Updated, e)),
        );
        records.extend(
            added
                .into_iter()
                .map(|e| EventRecord::from_entry(EventKind::Added, e)),
        );
        records.extend(
            removed
                .into_iter()
                .map(|e| EventRecord::from_entry(EventKind::Removed, e)),
        );
        if records.is_empty() {
            return;
        }
        trace!(count = records.len(), "queueing notification batch");
        self.queue.append(records);
    }
}
