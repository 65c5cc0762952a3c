use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::Stat;

/// How long the caller may trust an asserted entry before refreshing it.
pub const DEFAULT_WRITE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Put,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

/// Metadata command handed to the external crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCommand {
    pub verb: Verb,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>, // files only
    pub path: String,
    pub write_ttl: u64, // seconds
}

impl CrawlCommand {
    /// Assert `path` as a file (with size) or a directory (without).
    pub fn put(path: &str, stat: &Stat, write_ttl: Duration) -> Self {
        let (entry_type, size) = if stat.is_dir {
            (EntryType::Directory, None)
        } else {
            (EntryType::File, Some(stat.size))
        };
        CrawlCommand {
            verb: Verb::Put,
            entry_type: Some(entry_type),
            mode: Some(stat.mode),
            size,
            path: path.to_string(),
            write_ttl: write_ttl.as_secs(),
        }
    }

    /// Deletes are untyped; the target may have been a file or a directory.
    pub fn delete(path: &str, write_ttl: Duration) -> Self {
        CrawlCommand {
            verb: Verb::Delete,
            entry_type: None,
            mode: None,
            size: None,
            path: path.to_string(),
            write_ttl: write_ttl.as_secs(),
        }
    }
}
