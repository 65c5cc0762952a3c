use std::io;
use std::sync::Arc;

use models::{Access, Stat, StoreEntry};

/// Receiver for change batches produced by a store.
///
/// Stores may call this from any thread, including several at once.
pub trait NotificationCallback: Send + Sync {
    fn on_batch(&self, updated: Vec<StoreEntry>, added: Vec<StoreEntry>, removed: Vec<StoreEntry>);
}

/// Filesystem-like data source behind the pipeline.
///
/// Paths are absolute within the store: `/` is the dataset root.
pub trait BackingStore: Send + Sync {
    fn connect(&self, access: Access) -> io::Result<()>;
    fn close(&self) -> io::Result<()>;
    fn exists(&self, path: &str) -> io::Result<bool>;
    fn is_dir(&self, path: &str) -> io::Result<bool>;
    fn list_dir(&self, path: &str) -> io::Result<Vec<String>>;
    /// `Ok(None)` when the path does not exist.
    fn stat(&self, path: &str) -> io::Result<Option<Stat>>;
    fn read(&self, path: &str, offset: u64, length: u64) -> io::Result<Vec<u8>>;
    fn write(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()>;
    fn unlink(&self, path: &str) -> io::Result<()>;
    fn make_dirs(&self, path: &str) -> io::Result<()>;
    /// Drop any cached metadata for `path` and everything below it.
    fn clear_cache(&self, path: &str);
    /// Must be called before `connect` for the store to report changes.
    fn set_notification_callback(&self, callback: Arc<dyn NotificationCallback>);
}

pub(crate) fn require_writable(access: Option<Access>, path: &str) -> io::Result<()> {
    match access {
        Some(Access::ReadWrite) => Ok(()),
        Some(Access::ReadOnly) => Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("store opened read-only; refusing to modify {path}"),
        )),
        None => Err(io::Error::new(
            io::ErrorKind::NotConnected,
            format!("store is not connected; refusing to modify {path}"),
        )),
    }
}

pub(crate) fn now_ts() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
