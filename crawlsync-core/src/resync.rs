use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use models::{join_child, normalize_path};
use serde::Serialize;
use tracing::{debug, info, warn};
use utilities::BackingStore;

use crate::sink::NotificationSink;

/// Counts from one resync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub directories: usize,
    pub entries: usize,
    pub skipped: usize,
}

/// Breadth-first re-walk of a subtree that re-announces every entry as
/// Added through the sink, the same path live notifications take.
#[derive(Clone)]
pub struct ResyncWalker {
    store: Arc<dyn BackingStore>,
    sink: NotificationSink,
}

impl ResyncWalker {
    pub fn new(store: Arc<dyn BackingStore>, sink: NotificationSink) -> Self {
        ResyncWalker { store, sink }
    }

    /// Walk `root` to completion. Entry-level failures are logged and the
    /// affected branch skipped.
    pub fn resync(&self, root: &str) -> ResyncReport {
        let root = normalize_path(root);
        let mut report = ResyncReport::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        pending.push_back(root.clone());

        while let Some(dir) = pending.pop_front() {
            if !visited.insert(dir.clone()) {
                continue;
            }
            self.store.clear_cache(&dir);
            let names = match self.store.list_dir(&dir) {
                Ok(names) => names,
                Err(e) => {
                    warn!("Resync could not list {dir}: {e}; skipping branch");
                    report.skipped += 1;
                    continue;
                }
            };
            report.directories += 1;

            for name in names {
                let path = join_child(&dir, &name);
                let stat = match self.store.stat(&path) {
                    Ok(Some(stat)) => stat,
                    Ok(None) => {
                        debug!("{path} vanished during resync");
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("Resync could not stat {path}: {e}; skipping");
                        report.skipped += 1;
                        continue;
                    }
                };
                self.sink.added(&path, stat);
                report.entries += 1;
                if stat.is_dir {
                    pending.push_back(path);
                }
            }
        }

        info!(
            "Resync of {root} finished: {} directories, {} entries, {} skipped",
            report.directories, report.entries, report.skipped
        );
        report
    }
}
