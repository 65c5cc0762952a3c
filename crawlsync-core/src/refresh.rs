use std::sync::Arc;

use models::{normalize_path, parent_of, Stat};
use serde::Serialize;
use tracing::{info, warn};
use utilities::BackingStore;

use crate::error::DriverError;
use crate::resync::ResyncWalker;
use crate::sink::NotificationSink;

/// What a refresh found at the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RefreshOutcome {
    Updated { stat: Stat },
    Removed,
}

/// On-demand revalidation of single paths, plus store pass-throughs that keep
/// the queue in step with what they observe.
#[derive(Clone)]
pub struct RefreshHandler {
    store: Arc<dyn BackingStore>,
    sink: NotificationSink,
    walker: ResyncWalker,
}

impl RefreshHandler {
    pub fn new(store: Arc<dyn BackingStore>, sink: NotificationSink) -> Self {
        let walker = ResyncWalker::new(Arc::clone(&store), sink.clone());
        RefreshHandler {
            store,
            sink,
            walker,
        }
    }

    /// Drop cached metadata for `path` and report what the store says now.
    /// A live path also gets its parent re-walked.
    pub fn refresh(&self, path: &str) -> Result<RefreshOutcome, DriverError> {
        let path = normalize_path(path);
        self.store.clear_cache(&path);
        let stat = self.store.stat(&path).map_err(|source| DriverError::Store {
            path: path.clone(),
            source,
        })?;
        match stat {
            None => {
                info!("Refresh: {path} is gone");
                self.sink.removed(&path);
                Ok(RefreshOutcome::Removed)
            }
            Some(stat) => {
                self.sink.updated(&path, stat);
                self.walker.resync(&parent_of(&path));
                Ok(RefreshOutcome::Updated { stat })
            }
        }
    }

    /// Read through to the store. On failure the path is treated as gone:
    /// one Removed record is queued and the parent is re-walked.
    pub fn read(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>, DriverError> {
        let path = normalize_path(path);
        match self.store.read(&path, offset, length) {
            Ok(data) => Ok(data),
            Err(source) => {
                warn!("Read of {path} failed: {source}; marking removed and resyncing parent");
                self.sink.removed(&path);
                self.walker.resync(&parent_of(&path));
                Err(DriverError::RemoteIo { path, source })
            }
        }
    }

    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), DriverError> {
        let path = normalize_path(path);
        let written = self
            .store
            .write(&path, offset, data)
            .and_then(|_| self.store.stat(&path));
        match written {
            Ok(Some(stat)) => {
                self.sink.updated(&path, stat);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(source) => Err(DriverError::Store { path, source }),
        }
    }

    pub fn unlink(&self, path: &str) -> Result<(), DriverError> {
        let path = normalize_path(path);
        match self.store.unlink(&path) {
            Ok(()) => {
                self.sink.removed(&path);
                Ok(())
            }
            Err(source) => Err(DriverError::Store { path, source }),
        }
    }
}
