use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use models::{
    CrawlCommand, EventKind, EventRecord, Stat, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WRITE_TTL_SECS,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use utilities::BackingStore;

use crate::queue::EventQueue;

const EIO: i32 = 5;

/// Entry point of the external crawler. A non-zero status means the command
/// was rejected; the dispatcher logs it and moves on.
pub trait Ingest: Send + Sync {
    fn submit(&self, command: &CrawlCommand) -> i32;
}

/// Writes each command as one line of JSON.
pub struct JsonLinesIngest<W: Write + Send> {
    writer: Mutex<W>,
    cancel_on_failure: Option<CancellationToken>,
}

impl<W: Write + Send> JsonLinesIngest<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesIngest {
            writer: Mutex::new(writer),
            cancel_on_failure: None,
        }
    }

    /// Cancel `token` the first time a write fails, e.g. when the reader of a
    /// pipe has gone away.
    pub fn cancel_on_failure(mut self, token: CancellationToken) -> Self {
        self.cancel_on_failure = Some(token);
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Ingest for JsonLinesIngest<W> {
    fn submit(&self, command: &CrawlCommand) -> i32 {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match write_line(&mut *writer, command) {
            Ok(()) => 0,
            Err(e) => {
                warn!("Failed to write command for {}: {e}", command.path);
                if let Some(token) = &self.cancel_on_failure {
                    token.cancel();
                }
                e.raw_os_error().unwrap_or(EIO)
            }
        }
    }
}

fn write_line<W: Write>(writer: &mut W, command: &CrawlCommand) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, command)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Counters since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub queue_depth: u64,
}

/// Single consumer of the queue. Turns records into crawl commands and hands
/// them to the ingest entry point one at a time.
pub struct CrawlDispatcher {
    queue: Arc<EventQueue>,
    store: Option<Arc<dyn BackingStore>>,
    ingest: Arc<dyn Ingest>,
    poll_interval: Duration,
    write_ttl: Duration,
    dispatched: AtomicU64,
    rejected: AtomicU64,
    skipped: AtomicU64,
}

impl CrawlDispatcher {
    pub fn new(queue: Arc<EventQueue>, ingest: Arc<dyn Ingest>) -> Self {
        CrawlDispatcher {
            queue,
            store: None,
            ingest,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            write_ttl: Duration::from_secs(DEFAULT_WRITE_TTL_SECS),
            dispatched: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Store used to stat records that arrive without metadata.
    pub fn with_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_write_ttl(mut self, ttl: Duration) -> Self {
        self.write_ttl = ttl;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Dispatch exactly one command, sleeping while the queue is empty.
    ///
    /// Returns `false` only when `cancel` fires; the token is checked before
    /// every take and after every idle sleep.
    pub fn next_command(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                debug!("Dispatcher cancelled");
                return false;
            }
            let Some(record) = self.queue.take_one() else {
                thread::sleep(self.poll_interval);
                continue;
            };
            match self.build_command(&record) {
                Some(command) => {
                    self.submit(&command);
                    return true;
                }
                None => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Dispatch everything queued right now without waiting. Returns the
    /// number of commands submitted.
    pub fn drain_pending(&self) -> usize {
        let mut submitted = 0;
        while let Some(record) = self.queue.take_one() {
            match self.build_command(&record) {
                Some(command) => {
                    self.submit(&command);
                    submitted += 1;
                }
                None => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        submitted
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            queue_depth: self.queue.len() as u64,
        }
    }

    /// Classify a record. `None` when an Added or Updated record has no
    /// metadata and the store cannot supply it.
    pub fn build_command(&self, record: &EventRecord) -> Option<CrawlCommand> {
        match record.kind() {
            EventKind::Removed => Some(CrawlCommand::delete(record.path(), self.write_ttl)),
            EventKind::Added | EventKind::Updated => {
                let stat = record.stat().or_else(|| self.lookup(record.path()))?;
                Some(CrawlCommand::put(record.path(), &stat, self.write_ttl))
            }
        }
    }

    fn lookup(&self, path: &str) -> Option<Stat> {
        let Some(store) = self.store.as_ref() else {
            warn!("Record for {path} carries no metadata and no store is attached; skipping");
            return None;
        };
        match store.stat(path) {
            Ok(Some(stat)) => Some(stat),
            Ok(None) => {
                debug!("{path} no longer exists; skipping record");
                None
            }
            Err(e) => {
                warn!("Failed to stat {path} for dispatch: {e}; skipping");
                None
            }
        }
    }

    fn submit(&self, command: &CrawlCommand) {
        let status = self.ingest.submit(command);
        if status == 0 {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Ingest rejected {:?} {} with status {status}",
                command.verb, command.path
            );
        }
    }
}
