use serde::{Deserialize, Serialize};

use crate::path::normalize_path;

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Metadata snapshot returned by a backing store for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<i64>, // unix timestamp
}

impl Stat {
    pub fn file(size: u64) -> Self {
        Stat {
            is_dir: false,
            size,
            mode: DEFAULT_FILE_MODE,
            modified: None,
        }
    }

    pub fn directory() -> Self {
        Stat {
            is_dir: true,
            size: 0,
            mode: DEFAULT_DIR_MODE,
            modified: None,
        }
    }
}

/// One entry of a notification batch as reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub path: String,
    pub stat: Option<Stat>, // None for removals
}

impl StoreEntry {
    pub fn new(path: impl Into<String>, stat: Option<Stat>) -> Self {
        StoreEntry {
            path: path.into(),
            stat,
        }
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self::new(path, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Updated,
    Added,
    Removed,
}

/// A single queued change. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    kind: EventKind,
    path: String,
    stat: Option<Stat>,
}

impl EventRecord {
    /// Build a record, normalizing the path. Removals never carry a stat.
    pub fn new(kind: EventKind, path: &str, stat: Option<Stat>) -> Self {
        let stat = match kind {
            EventKind::Removed => None,
            EventKind::Added | EventKind::Updated => stat,
        };
        EventRecord {
            kind,
            path: normalize_path(path),
            stat,
        }
    }

    pub fn added(path: &str, stat: Stat) -> Self {
        Self::new(EventKind::Added, path, Some(stat))
    }

    pub fn updated(path: &str, stat: Stat) -> Self {
        Self::new(EventKind::Updated, path, Some(stat))
    }

    pub fn removed(path: &str) -> Self {
        Self::new(EventKind::Removed, path, None)
    }

    pub fn from_entry(kind: EventKind, entry: StoreEntry) -> Self {
        Self::new(kind, &entry.path, entry.stat)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stat(&self) -> Option<Stat> {
        self.stat
    }
}
