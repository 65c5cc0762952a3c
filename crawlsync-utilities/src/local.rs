use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use models::{normalize_path, Access, PluginConfig, Stat, StoreEntry, WORK_ROOT_KEY};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::store::{require_writable, BackingStore, NotificationCallback};

type StatCache = Arc<Mutex<HashMap<String, Stat>>>;

/// Store backed by a directory on the local filesystem.
///
/// Store paths map onto `work_root`; `..` segments are resolved before
/// joining so no path can escape the root.
pub struct LocalStore {
    root: PathBuf,
    watch: bool,
    access: Mutex<Option<Access>>,
    cache: StatCache,
    callback: Mutex<Option<Arc<dyn NotificationCallback>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("root", &self.root)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, watch: bool) -> Self {
        LocalStore {
            root: root.into(),
            watch,
            access: Mutex::new(None),
            cache: Arc::new(Mutex::new(HashMap::new())),
            callback: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Keys: `work_root` (required), `watch` (bool, default true).
    pub fn from_config(config: &PluginConfig) -> io::Result<Self> {
        let root = config
            .get(WORK_ROOT_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("local store requires `{WORK_ROOT_KEY}`"),
                )
            })?;
        let watch = match config.get("watch") {
            None => true,
            Some(v) => v.as_bool().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "`watch` must be a boolean")
            })?,
        };
        Ok(Self::new(root, watch))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let norm = normalize_path(path);
        self.root.join(norm.trim_start_matches('/'))
    }

    fn invalidate(&self, path: &str) {
        invalidate(&self.cache, &normalize_path(path));
    }

    fn start_watcher(&self, callback: Arc<dyn NotificationCallback>) -> io::Result<()> {
        let root = self.root.clone();
        let cache = Arc::clone(&self.cache);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => forward_event(&root, &cache, callback.as_ref(), &event),
                Err(e) => error!("Watch error on {}: {e}", root.display()),
            }
        })
        .map_err(io::Error::other)?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(io::Error::other)?;
        info!("Watching {}", self.root.display());
        *lock(&self.watcher) = Some(watcher);
        Ok(())
    }
}

fn invalidate(cache: &StatCache, norm: &str) {
    let mut cache = lock(cache);
    if norm == "/" {
        cache.clear();
        return;
    }
    let prefix = format!("{norm}/");
    cache.retain(|k, _| k != norm && !k.starts_with(&prefix));
}

/// Symlinks are reported as entries of their own, never as the directory
/// they point at, unless `follow` is set (used for the root itself).
fn stat_path(path: &Path, follow: bool) -> io::Result<Option<Stat>> {
    let md = if follow {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    };
    let md = match md {
        Ok(md) => md,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut stat = if md.is_dir() {
        Stat::directory()
    } else {
        Stat::file(md.len())
    };
    stat.modified = md
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        stat.mode = md.permissions().mode() & 0o7777;
    }
    Ok(Some(stat))
}

fn store_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let mut out = String::new();
    for comp in rel.components() {
        if let Component::Normal(c) = comp {
            out.push('/');
            out.push_str(&c.to_string_lossy());
        }
    }
    Some(if out.is_empty() { "/".to_string() } else { out })
}

/// Translate one watcher event into a notification batch.
fn forward_event(
    root: &Path,
    cache: &StatCache,
    callback: &dyn NotificationCallback,
    event: &notify::Event,
) {
    let mut updated = Vec::new();
    let mut added = Vec::new();
    let mut removed = Vec::new();

    let present = |abs: &Path, bucket: &mut Vec<StoreEntry>, removed: &mut Vec<StoreEntry>| {
        let Some(path) = store_path(root, abs) else {
            warn!("Path {:?} not under store root {}; skipping", abs, root.display());
            return;
        };
        invalidate(cache, &path);
        match stat_path(abs, path == "/") {
            Ok(Some(stat)) => bucket.push(StoreEntry::new(path, Some(stat))),
            Ok(None) => {
                debug!("{path} vanished before it could be stat'ed, treating as removed");
                removed.push(StoreEntry::removed(path));
            }
            Err(e) => warn!("Failed to stat {path} after change: {e}"),
        }
    };
    let gone = |abs: &Path, removed: &mut Vec<StoreEntry>| {
        if let Some(path) = store_path(root, abs) {
            invalidate(cache, &path);
            removed.push(StoreEntry::removed(path));
        }
    };

    match &event.kind {
        EventKind::Create(_) => {
            for p in &event.paths {
                present(p, &mut added, &mut removed);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for p in &event.paths {
                gone(p, &mut removed);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for p in &event.paths {
                present(p, &mut added, &mut removed);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let Some(from) = event.paths.first() {
                gone(from, &mut removed);
            }
            if let Some(to) = event.paths.get(1) {
                present(to, &mut added, &mut removed);
            }
        }
        EventKind::Modify(_) => {
            for p in &event.paths {
                present(p, &mut updated, &mut removed);
            }
        }
        EventKind::Remove(_) => {
            for p in &event.paths {
                gone(p, &mut removed);
            }
        }
        _ => return,
    }

    if updated.is_empty() && added.is_empty() && removed.is_empty() {
        return;
    }
    callback.on_batch(updated, added, removed);
}

impl BackingStore for LocalStore {
    fn connect(&self, access: Access) -> io::Result<()> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("work root {} is not a directory", self.root.display()),
            ));
        }
        *lock(&self.access) = Some(access);
        let callback = lock(&self.callback).clone();
        if let (true, Some(callback)) = (self.watch, callback) {
            self.start_watcher(callback)?;
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        lock(&self.watcher).take();
        *lock(&self.access) = None;
        lock(&self.cache).clear();
        Ok(())
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn is_dir(&self, path: &str) -> io::Result<bool> {
        Ok(self.stat(path)?.is_some_and(|s| s.is_dir))
    }

    fn list_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.resolve(path))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn stat(&self, path: &str) -> io::Result<Option<Stat>> {
        let norm = normalize_path(path);
        if let Some(stat) = lock(&self.cache).get(&norm) {
            return Ok(Some(*stat));
        }
        let stat = stat_path(&self.resolve(&norm), norm == "/")?;
        if let Some(stat) = stat {
            lock(&self.cache).insert(norm, stat);
        }
        Ok(stat)
    }

    fn read(&self, path: &str, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(self.resolve(path))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut out = Vec::new();
        file.take(length).read_to_end(&mut out)?;
        Ok(out)
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        require_writable(*lock(&self.access), path)?;
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).write(true).open(&target)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        self.invalidate(path);
        Ok(())
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        require_writable(*lock(&self.access), path)?;
        fs::remove_file(self.resolve(path))?;
        self.invalidate(path);
        Ok(())
    }

    fn make_dirs(&self, path: &str) -> io::Result<()> {
        require_writable(*lock(&self.access), path)?;
        fs::create_dir_all(self.resolve(path))
    }

    fn clear_cache(&self, path: &str) {
        self.invalidate(path);
    }

    fn set_notification_callback(&self, callback: Arc<dyn NotificationCallback>) {
        *lock(&self.callback) = Some(callback);
    }
}
