use std::io;
use std::sync::{Arc, Mutex};

use crawlsync_utilities as utilities;
use models::{Access, StoreEntry};
use serde_json::json;
use utilities::{BackingStore, MemoryStore, NotificationCallback, PluginError, PluginRegistry};

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<(Vec<StoreEntry>, Vec<StoreEntry>, Vec<StoreEntry>)>>,
}

impl NotificationCallback for Recorder {
    fn on_batch(&self, updated: Vec<StoreEntry>, added: Vec<StoreEntry>, removed: Vec<StoreEntry>) {
        self.batches.lock().unwrap().push((updated, added, removed));
    }
}

#[test]
fn seeded_tree_lists_and_stats() {
    let store = MemoryStore::new();
    store.insert_file("/a/b/c.txt", b"hello");
    store.insert_dir("/d");

    assert_eq!(store.list_dir("/").unwrap(), vec!["a", "d"]);
    assert_eq!(store.list_dir("/a/b").unwrap(), vec!["c.txt"]);

    let dir = store.stat("/a/b").unwrap().unwrap();
    assert!(dir.is_dir);
    let file = store.stat("/a/b/c.txt").unwrap().unwrap();
    assert!(!file.is_dir);
    assert_eq!(file.size, 5);
    assert_eq!(store.stat("/missing").unwrap(), None);
    assert!(store.is_dir("/").unwrap());
    assert!(!store.exists("/a/x").unwrap());
}

#[test]
fn reads_honor_offset_and_length() {
    let store = MemoryStore::new();
    store.insert_file("/f", b"0123456789");
    assert_eq!(store.read("/f", 2, 3).unwrap(), b"234");
    assert_eq!(store.read("/f", 8, 10).unwrap(), b"89");
    assert!(store.read("/f", 20, 1).unwrap().is_empty());
    assert_eq!(
        store.read("/nope", 0, 1).unwrap_err().kind(),
        io::ErrorKind::NotFound
    );
}

#[test]
fn writes_require_read_write_access() {
    let store = MemoryStore::new();
    assert_eq!(
        store.write("/f", 0, b"x").unwrap_err().kind(),
        io::ErrorKind::NotConnected
    );
    store.connect(Access::ReadOnly).unwrap();
    assert_eq!(
        store.write("/f", 0, b"x").unwrap_err().kind(),
        io::ErrorKind::PermissionDenied
    );
    store.close().unwrap();
    store.connect(Access::ReadWrite).unwrap();
    store.write("/f", 0, b"abc").unwrap();
    store.write("/f", 5, b"z").unwrap();
    assert_eq!(store.read("/f", 0, 10).unwrap(), b"abc\0\0z");
}

#[test]
fn out_of_range_write_offsets_are_rejected() {
    let store = MemoryStore::new();
    store.insert_file("/f", b"keep");
    store.connect(Access::ReadWrite).unwrap();

    for offset in [u64::MAX - 1, 1 << 40, utilities::memory::MAX_FILE_LEN as u64] {
        assert_eq!(
            store.write("/f", offset, b"ab").unwrap_err().kind(),
            io::ErrorKind::InvalidInput,
            "offset {offset}"
        );
    }
    assert_eq!(store.read("/f", 0, 10).unwrap(), b"keep");
    assert!(!store.exists("/g").unwrap());
    assert!(store.write("/g", u64::MAX, b"").is_err());
    assert!(!store.exists("/g").unwrap());
}

#[test]
fn mutations_notify_registered_callback() {
    let store = MemoryStore::new();
    let recorder = Arc::new(Recorder::default());
    store.set_notification_callback(recorder.clone());
    store.connect(Access::ReadWrite).unwrap();

    store.write("/dir/new.txt", 0, b"hi").unwrap();
    store.write("/dir/new.txt", 0, b"HI").unwrap();
    store.unlink("/dir/new.txt").unwrap();

    let batches = recorder.batches.lock().unwrap();
    assert_eq!(batches.len(), 3);

    let (updated, added, removed) = &batches[0];
    assert!(updated.is_empty() && removed.is_empty());
    let added_paths: Vec<_> = added.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(added_paths, vec!["/dir", "/dir/new.txt"]);

    assert_eq!(batches[1].0.len(), 1);
    assert_eq!(batches[1].0[0].path, "/dir/new.txt");

    assert_eq!(batches[2].2, vec![StoreEntry::removed("/dir/new.txt")]);
}

#[test]
fn external_remove_reports_whole_subtree() {
    let store = MemoryStore::new();
    store.insert_file("/t/a/1", b"1");
    store.insert_file("/t/2", b"2");
    let recorder = Arc::new(Recorder::default());
    store.set_notification_callback(recorder.clone());

    store.external_remove("/t");

    let batches = recorder.batches.lock().unwrap();
    let mut removed: Vec<_> = batches[0].2.iter().map(|e| e.path.clone()).collect();
    removed.sort();
    assert_eq!(removed, vec!["/t", "/t/2", "/t/a", "/t/a/1"]);
    assert!(!store.exists("/t/a/1").unwrap());
    assert_eq!(store.list_dir("/").unwrap(), Vec::<String>::new());
}

#[test]
fn injected_failures_surface_as_errors() {
    let store = MemoryStore::new();
    store.insert_file("/bad", b"x");
    store.fail_reads_for("/bad");
    store.fail_stats_for("/bad");
    assert!(store.read("/bad", 0, 1).is_err());
    assert!(store.stat("/bad").is_err());

    store.set_fail_connect(true);
    assert_eq!(
        store.connect(Access::ReadOnly).unwrap_err().kind(),
        io::ErrorKind::ConnectionRefused
    );
    assert_eq!(store.connect_count(), 1);
}

#[test]
fn registry_builds_memory_store_from_config() {
    let registry = PluginRegistry::with_builtins();
    assert_eq!(registry.names(), vec!["local", "memory"]);

    let config = json!({
        "dirs": ["/empty"],
        "files": { "/docs/readme.md": "hello" },
    });
    let store = registry
        .load("memory", config.as_object().unwrap())
        .unwrap();
    assert!(store.is_dir("/empty").unwrap());
    assert_eq!(store.read("/docs/readme.md", 0, 64).unwrap(), b"hello");

    let bad = json!({ "files": { "/x": 1 } });
    assert!(matches!(
        registry.load("memory", bad.as_object().unwrap()),
        Err(PluginError::Load { .. })
    ));
    assert!(matches!(
        registry.load("s3", config.as_object().unwrap()),
        Err(PluginError::NotFound(name)) if name == "s3"
    ));
}

#[test]
fn entries_are_stamped_with_current_unix_time() {
    let before = time::OffsetDateTime::now_utc().unix_timestamp();
    let store = MemoryStore::new();
    store.insert_file("/stamped", b"t");
    let after = time::OffsetDateTime::now_utc().unix_timestamp();

    for path in ["/", "/stamped"] {
        let modified = store.stat(path).unwrap().unwrap().modified.unwrap();
        assert!((before..=after).contains(&modified), "{path}: {modified}");
    }
}
