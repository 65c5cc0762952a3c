use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use models::{normalize_path, parent_of, Access, PluginConfig, Stat, StoreEntry};
use serde_json::Value;

use crate::store::{now_ts, require_writable, BackingStore, NotificationCallback};

/// Largest file an in-memory store will grow to.
pub const MAX_FILE_LEN: usize = 1 << 30;

/// In-memory store. Cloning shares the same tree, so tests can keep a handle
/// to a store that the driver owns.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<String, Node>,
    children: HashMap<String, BTreeMap<String, String>>,
    access: Option<Access>,
    callback: Option<Arc<dyn NotificationCallback>>,
    failing_reads: HashSet<String>,
    failing_stats: HashSet<String>,
    fail_connect: bool,
    connects: usize,
    closes: usize,
    cache_clears: Vec<String>,
}

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, modified: i64 },
    Dir { modified: i64 },
}

impl Node {
    fn stat(&self) -> Stat {
        match self {
            Node::File { data, modified } => Stat {
                modified: Some(*modified),
                ..Stat::file(data.len() as u64)
            },
            Node::Dir { modified } => Stat {
                modified: Some(*modified),
                ..Stat::directory()
            },
        }
    }
}

/// Entries produced by one mutation, delivered after the lock is released.
#[derive(Default)]
struct Pending {
    updated: Vec<StoreEntry>,
    added: Vec<StoreEntry>,
    removed: Vec<StoreEntry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStore")
            .field("nodes", &inner.nodes.len())
            .field("access", &inner.access)
            .field("connects", &inner.connects)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut inner = MemoryInner::default();
        inner
            .nodes
            .insert("/".to_string(), Node::Dir { modified: now_ts() });
        MemoryStore {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Build a store from plugin configuration.
    ///
    /// Optional keys: `dirs` (array of paths) and `files` (object mapping a
    /// path to its UTF-8 content).
    pub fn from_config(config: &PluginConfig) -> io::Result<Self> {
        let store = Self::new();
        if let Some(dirs) = config.get("dirs") {
            let dirs = dirs.as_array().ok_or_else(|| invalid("`dirs` must be an array"))?;
            for dir in dirs {
                let dir = dir
                    .as_str()
                    .ok_or_else(|| invalid("`dirs` entries must be strings"))?;
                store.insert_dir(dir);
            }
        }
        if let Some(files) = config.get("files") {
            let files = files
                .as_object()
                .ok_or_else(|| invalid("`files` must be a table"))?;
            for (path, content) in files {
                let content = match content {
                    Value::String(s) => s.as_bytes().to_vec(),
                    _ => return Err(invalid("`files` values must be strings")),
                };
                store.insert_file(path, &content);
            }
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a file without emitting notifications.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let mut inner = self.lock();
        let mut pending = Pending::default();
        inner.put_file(&normalize_path(path), 0, data, true, &mut pending);
    }

    /// Seed a directory (and its parents) without emitting notifications.
    pub fn insert_dir(&self, path: &str) {
        let mut inner = self.lock();
        let mut pending = Pending::default();
        inner.make_dirs(&normalize_path(path), &mut pending);
    }

    /// Replace a file as another client of the store would, notifying the
    /// registered callback.
    pub fn external_write(&self, path: &str, data: &[u8]) {
        let (callback, pending) = {
            let mut inner = self.lock();
            let mut pending = Pending::default();
            inner.put_file(&normalize_path(path), 0, data, true, &mut pending);
            (inner.callback.clone(), pending)
        };
        deliver(callback, pending);
    }

    /// Remove a file or a whole subtree as another client would.
    pub fn external_remove(&self, path: &str) {
        let (callback, pending) = {
            let mut inner = self.lock();
            let mut pending = Pending::default();
            inner.remove_tree(&normalize_path(path), &mut pending);
            (inner.callback.clone(), pending)
        };
        deliver(callback, pending);
    }

    pub fn fail_reads_for(&self, path: &str) {
        self.lock().failing_reads.insert(normalize_path(path));
    }

    pub fn fail_stats_for(&self, path: &str) {
        self.lock().failing_stats.insert(normalize_path(path));
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn is_connected(&self) -> bool {
        self.lock().access.is_some()
    }

    /// Paths passed to `clear_cache`, in call order.
    pub fn cleared_paths(&self) -> Vec<String> {
        self.lock().cache_clears.clone()
    }
}

impl MemoryInner {
    fn link_child(&mut self, path: &str) {
        if path == "/" {
            return;
        }
        let parent = parent_of(path);
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        self.children
            .entry(parent)
            .or_default()
            .insert(name, path.to_string());
    }

    fn unlink_child(&mut self, path: &str) {
        let parent = parent_of(path);
        if let Some(children) = self.children.get_mut(&parent) {
            children.retain(|_, p| p != path);
        }
    }

    fn make_dirs(&mut self, path: &str, pending: &mut Pending) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if self.nodes.contains_key(&current) {
                continue;
            }
            let node = Node::Dir { modified: now_ts() };
            pending
                .added
                .push(StoreEntry::new(current.clone(), Some(node.stat())));
            self.nodes.insert(current.clone(), node);
            self.link_child(&current);
        }
    }

    fn put_file(
        &mut self,
        path: &str,
        start: usize,
        data: &[u8],
        replace: bool,
        pending: &mut Pending,
    ) {
        self.make_dirs(&parent_of(path), pending);
        let existed = self.nodes.contains_key(path);
        let mut contents = match self.nodes.get(path) {
            Some(Node::File { data, .. }) if !replace => data.clone(),
            _ => Vec::new(),
        };
        let end = start + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(data);
        let node = Node::File {
            data: contents,
            modified: now_ts(),
        };
        let entry = StoreEntry::new(path, Some(node.stat()));
        self.nodes.insert(path.to_string(), node);
        self.link_child(path);
        if existed {
            pending.updated.push(entry);
        } else {
            pending.added.push(entry);
        }
    }

    fn remove_tree(&mut self, path: &str, pending: &mut Pending) {
        if path == "/" || !self.nodes.contains_key(path) {
            return;
        }
        let mut stack = vec![path.to_string()];
        let mut doomed = Vec::new();
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children.remove(&current) {
                stack.extend(children.into_values());
            }
            doomed.push(current);
        }
        for p in doomed.iter().rev() {
            self.nodes.remove(p);
            pending.removed.push(StoreEntry::removed(p.clone()));
        }
        self.unlink_child(path);
    }

    fn node(&self, path: &str) -> io::Result<&Node> {
        self.nodes.get(path).ok_or_else(|| not_found(path))
    }
}

fn deliver(callback: Option<Arc<dyn NotificationCallback>>, pending: Pending) {
    let Some(callback) = callback else {
        return;
    };
    if pending.updated.is_empty() && pending.added.is_empty() && pending.removed.is_empty() {
        return;
    }
    callback.on_batch(pending.updated, pending.added, pending.removed);
}

/// Start index for a write of `len` bytes at `offset`, rejecting spans that
/// overflow or would grow a file past `MAX_FILE_LEN`.
fn write_start(offset: u64, len: usize) -> io::Result<usize> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(len).map(|end| (start, end)))
        .filter(|&(_, end)| end <= MAX_FILE_LEN)
        .map(|(start, _)| start)
        .ok_or_else(|| {
            invalid(&format!(
                "write of {len} bytes at offset {offset} exceeds the {MAX_FILE_LEN}-byte file limit"
            ))
        })
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path} not found"))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

impl BackingStore for MemoryStore {
    fn connect(&self, access: Access) -> io::Result<()> {
        let mut inner = self.lock();
        inner.connects += 1;
        if inner.fail_connect {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory store configured to refuse connections",
            ));
        }
        inner.access = Some(access);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let mut inner = self.lock();
        inner.closes += 1;
        inner.access = None;
        Ok(())
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        Ok(self.lock().nodes.contains_key(&normalize_path(path)))
    }

    fn is_dir(&self, path: &str) -> io::Result<bool> {
        Ok(matches!(
            self.lock().nodes.get(&normalize_path(path)),
            Some(Node::Dir { .. })
        ))
    }

    fn list_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let inner = self.lock();
        let norm = normalize_path(path);
        match inner.node(&norm)? {
            Node::Dir { .. } => {}
            Node::File { .. } => return Err(io::Error::other(format!("{norm} is not a directory"))),
        }
        Ok(inner
            .children
            .get(&norm)
            .map(|children| children.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn stat(&self, path: &str) -> io::Result<Option<Stat>> {
        let inner = self.lock();
        let norm = normalize_path(path);
        if inner.failing_stats.contains(&norm) {
            return Err(io::Error::other(format!("stat failed for {norm}")));
        }
        Ok(inner.nodes.get(&norm).map(Node::stat))
    }

    fn read(&self, path: &str, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let inner = self.lock();
        let norm = normalize_path(path);
        if inner.failing_reads.contains(&norm) {
            return Err(io::Error::other(format!("read failed for {norm}")));
        }
        match inner.node(&norm)? {
            Node::File { data, .. } => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(length as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Node::Dir { .. } => Err(io::Error::other(format!("{norm} is a directory"))),
        }
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let (callback, pending) = {
            let mut inner = self.lock();
            let norm = normalize_path(path);
            require_writable(inner.access, &norm)?;
            if let Some(Node::Dir { .. }) = inner.nodes.get(&norm) {
                return Err(io::Error::other(format!("{norm} is a directory")));
            }
            let start = write_start(offset, data.len())?;
            let mut pending = Pending::default();
            inner.put_file(&norm, start, data, false, &mut pending);
            (inner.callback.clone(), pending)
        };
        deliver(callback, pending);
        Ok(())
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        let (callback, pending) = {
            let mut inner = self.lock();
            let norm = normalize_path(path);
            require_writable(inner.access, &norm)?;
            match inner.node(&norm)? {
                Node::File { .. } => {}
                Node::Dir { .. } => {
                    return Err(io::Error::other(format!("{norm} is a directory")));
                }
            }
            let mut pending = Pending::default();
            inner.remove_tree(&norm, &mut pending);
            (inner.callback.clone(), pending)
        };
        deliver(callback, pending);
        Ok(())
    }

    fn make_dirs(&self, path: &str) -> io::Result<()> {
        let (callback, pending) = {
            let mut inner = self.lock();
            let norm = normalize_path(path);
            require_writable(inner.access, &norm)?;
            if let Some(Node::File { .. }) = inner.nodes.get(&norm) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{norm} exists as a file"),
                ));
            }
            let mut pending = Pending::default();
            inner.make_dirs(&norm, &mut pending);
            (inner.callback.clone(), pending)
        };
        deliver(callback, pending);
        Ok(())
    }

    fn clear_cache(&self, path: &str) {
        self.lock().cache_clears.push(normalize_path(path));
    }

    fn set_notification_callback(&self, callback: Arc<dyn NotificationCallback>) {
        self.lock().callback = Some(callback);
    }
}
