use std::collections::HashSet;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crawlsync::{
    CrawlDispatcher, Driver, DriverError, DriverState, EventQueue, Ingest, JsonLinesIngest,
    EREMOTEIO,
};
use models::{
    Access, CrawlCommand, DriverConfig, EntryType, EventKind, EventRecord, Role, Stat, Verb,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use utilities::{BackingStore, MemoryStore, NotificationCallback, PluginRegistry};

#[derive(Default)]
struct Collect {
    commands: Mutex<Vec<CrawlCommand>>,
}

impl Ingest for Collect {
    fn submit(&self, command: &CrawlCommand) -> i32 {
        self.commands.lock().unwrap().push(command.clone());
        0
    }
}

fn shared_memory(store: &MemoryStore) -> PluginRegistry {
    let store = store.clone();
    let mut registry = PluginRegistry::new();
    registry.register("mem", move |_| Ok(Arc::new(store.clone()) as Arc<dyn BackingStore>));
    registry
}

fn memory_config() -> DriverConfig {
    DriverConfig {
        plugin: Some("mem".into()),
        plugin_config: Some(json!("{}")),
        root: Some("/dataset".into()),
        poll_interval_ms: 10,
        ..DriverConfig::default()
    }
}

fn sample_tree() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_dir("/empty");
    store.insert_file("/docs/readme.md", b"# hello");
    store.insert_file("/docs/deep/nested/leaf.bin", &[0u8; 32]);
    store.insert_file("/top.txt", b"top");
    store
}

#[test]
fn fifo_and_at_most_once_across_producers() {
    let queue = Arc::new(EventQueue::new());
    let collect = Arc::new(Collect::default());
    let dispatcher = CrawlDispatcher::new(Arc::clone(&queue), collect.clone())
        .with_poll_interval(Duration::from_millis(5));

    queue.append(vec![
        EventRecord::added("/1", Stat::file(1)),
        EventRecord::added("/2", Stat::file(2)),
    ]);
    queue.append(vec![EventRecord::removed("/1")]);

    let token = CancellationToken::new();
    for _ in 0..3 {
        assert!(dispatcher.next_command(&token));
    }
    assert_eq!(dispatcher.drain_pending(), 0);

    let commands = collect.commands.lock().unwrap();
    let seen: Vec<(Verb, &str)> = commands.iter().map(|c| (c.verb, c.path.as_str())).collect();
    assert_eq!(
        seen,
        vec![(Verb::Put, "/1"), (Verb::Put, "/2"), (Verb::Delete, "/1")]
    );
}

#[test]
fn discover_init_seeds_every_entry_once() {
    let store = sample_tree();
    let driver = Driver::new(Role::Discover, memory_config(), shared_memory(&store));
    driver.init().unwrap();
    assert_eq!(driver.state(), DriverState::Ready);

    let queue = driver.queue();
    let mut paths = Vec::new();
    while let Some(record) = queue.take_one() {
        assert_eq!(record.kind(), EventKind::Added);
        paths.push(record.path().to_string());
    }
    let expected: HashSet<&str> = [
        "/empty",
        "/docs",
        "/docs/readme.md",
        "/docs/deep",
        "/docs/deep/nested",
        "/docs/deep/nested/leaf.bin",
        "/top.txt",
    ]
    .into_iter()
    .collect();
    assert_eq!(paths.len(), expected.len());
    assert_eq!(paths.iter().map(String::as_str).collect::<HashSet<_>>(), expected);

    let cleared = store.cleared_paths();
    let dirs: HashSet<&str> = cleared.iter().map(String::as_str).collect();
    assert_eq!(cleared.len(), dirs.len(), "each directory is visited once");
    assert_eq!(
        dirs,
        ["/", "/empty", "/docs", "/docs/deep", "/docs/deep/nested"]
            .into_iter()
            .collect()
    );
}

#[test]
fn crawl_role_does_not_seed() {
    let store = sample_tree();
    let driver = Driver::new(Role::Crawl, memory_config(), shared_memory(&store));
    driver.init().unwrap();
    assert!(driver.queue().is_empty());
    assert!(store.cleared_paths().is_empty());
}

#[test]
fn init_and_shutdown_are_idempotent() {
    let store = sample_tree();
    let driver = Arc::new(Driver::new(
        Role::Crawl,
        memory_config(),
        shared_memory(&store),
    ));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.init())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    assert_eq!(store.connect_count(), 1);
    assert!(store.is_connected());

    driver.shutdown();
    driver.shutdown();
    assert_eq!(store.close_count(), 1);
    assert!(!store.is_connected());
    assert!(matches!(driver.store(), Err(DriverError::NotInitialized)));
}

#[test]
fn dispatched_commands_are_classified() {
    let store = sample_tree();
    let driver = Driver::new(Role::Discover, memory_config(), shared_memory(&store));
    driver.init().unwrap();
    store.external_remove("/top.txt");

    let collect = Arc::new(Collect::default());
    let dispatcher = driver.dispatcher(collect.clone());
    assert_eq!(dispatcher.drain_pending(), 8);

    let commands = collect.commands.lock().unwrap();
    let leaf = commands
        .iter()
        .find(|c| c.path == "/docs/deep/nested/leaf.bin")
        .unwrap();
    assert_eq!(leaf.entry_type, Some(EntryType::File));
    assert_eq!(leaf.size, Some(32));
    assert_eq!(leaf.write_ttl, 300);

    let dir = commands.iter().find(|c| c.path == "/docs").unwrap();
    assert_eq!(dir.entry_type, Some(EntryType::Directory));
    assert_eq!(dir.size, None);
    assert_eq!(dir.mode, Some(0o755));

    let delete = commands.last().unwrap();
    assert_eq!(delete.verb, Verb::Delete);
    assert_eq!(delete.path, "/top.txt");
    assert_eq!(delete.entry_type, None);
    assert_eq!(delete.size, None);
}

#[test]
fn read_failure_heals_the_view() {
    let store = sample_tree();
    store.fail_reads_for("/docs/readme.md");
    let driver = Driver::new(Role::Read, memory_config(), shared_memory(&store));
    driver.init().unwrap();
    let handler = driver.refresh_handler().unwrap();

    let err = handler.read("/docs/readme.md", 0, 10).unwrap_err();
    assert!(matches!(err, DriverError::RemoteIo { .. }));
    assert_eq!(err.code(), EREMOTEIO);

    let queue = driver.queue();
    let first = queue.take_one().unwrap();
    assert_eq!(first.kind(), EventKind::Removed);
    assert_eq!(first.path(), "/docs/readme.md");
    let rest: Vec<EventRecord> = std::iter::from_fn(|| queue.take_one()).collect();
    assert!(rest.iter().all(|r| r.kind() == EventKind::Added));
    assert!(rest.iter().any(|r| r.path() == "/docs/deep"));
    assert!(store.cleared_paths().contains(&"/docs".to_string()));

    assert_eq!(handler.read("/top.txt", 0, 100).unwrap(), b"top");
}

#[test]
fn empty_queue_blocks_until_a_record_arrives() {
    let queue = Arc::new(EventQueue::new());
    let collect = Arc::new(Collect::default());
    let poll = Duration::from_millis(25);
    let dispatcher =
        CrawlDispatcher::new(Arc::clone(&queue), collect.clone()).with_poll_interval(poll);

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(80));
            queue.append(vec![EventRecord::added("/late", Stat::file(9))]);
        })
    };

    let started = Instant::now();
    assert!(dispatcher.next_command(&CancellationToken::new()));
    let waited = started.elapsed();
    producer.join().unwrap();

    assert!(waited >= Duration::from_millis(80));
    assert!(waited >= poll);
    assert_eq!(collect.commands.lock().unwrap()[0].path, "/late");
}

#[test]
fn live_notifications_reach_the_crawler() {
    let store = MemoryStore::new();
    let driver = Driver::new(Role::Crawl, memory_config(), shared_memory(&store));
    driver.init().unwrap();

    store.external_write("/a/b.txt", b"12");
    store.external_write("/a/b.txt", b"1234");
    store.external_remove("/a");

    let ingest = Arc::new(JsonLinesIngest::new(Vec::new()));
    let dispatcher = driver.dispatcher(ingest.clone());
    assert_eq!(dispatcher.drain_pending(), 5);
    drop(dispatcher);

    let ingest = Arc::try_unwrap(ingest).ok().unwrap();
    let text = String::from_utf8(ingest.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let summary: Vec<(String, String)> = lines
        .iter()
        .map(|v| {
            (
                v["verb"].as_str().unwrap().to_string(),
                v["path"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("put".into(), "/a".into()),
            ("put".into(), "/a/b.txt".into()),
            ("put".into(), "/a/b.txt".into()),
            ("delete".into(), "/a/b.txt".into()),
            ("delete".into(), "/a".into()),
        ]
    );
    assert_eq!(lines[2]["size"], 4);
}

/// Store whose root is a file, to exercise the root check.
struct FileRoot {
    closes: Mutex<usize>,
}

impl BackingStore for FileRoot {
    fn connect(&self, _access: Access) -> io::Result<()> {
        Ok(())
    }
    fn close(&self) -> io::Result<()> {
        *self.closes.lock().unwrap() += 1;
        Err(io::Error::other("close failed"))
    }
    fn exists(&self, _path: &str) -> io::Result<bool> {
        Ok(true)
    }
    fn is_dir(&self, _path: &str) -> io::Result<bool> {
        Ok(false)
    }
    fn list_dir(&self, _path: &str) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
    fn stat(&self, _path: &str) -> io::Result<Option<Stat>> {
        Ok(Some(Stat::file(0)))
    }
    fn read(&self, _path: &str, _offset: u64, _length: u64) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }
    fn write(&self, _path: &str, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
    fn unlink(&self, _path: &str) -> io::Result<()> {
        Ok(())
    }
    fn make_dirs(&self, _path: &str) -> io::Result<()> {
        Ok(())
    }
    fn clear_cache(&self, _path: &str) {}
    fn set_notification_callback(&self, _callback: Arc<dyn NotificationCallback>) {}
}

#[test]
fn root_that_is_not_a_directory_fails_init_and_closes() {
    let store = Arc::new(FileRoot {
        closes: Mutex::new(0),
    });
    let mut registry = PluginRegistry::new();
    {
        let store = Arc::clone(&store);
        registry.register("mem", move |_| Ok(Arc::clone(&store) as Arc<dyn BackingStore>));
    }
    let driver = Driver::new(Role::Discover, memory_config(), registry);
    assert!(matches!(
        driver.init(),
        Err(DriverError::RootNotDirectory(root)) if root == "/dataset"
    ));
    assert_eq!(driver.state(), DriverState::Failed);
    assert_eq!(*store.closes.lock().unwrap(), 1);
}

#[test]
fn local_plugin_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("photos/2024")).unwrap();
    fs::write(tmp.path().join("photos/2024/a.jpg"), vec![1u8; 10]).unwrap();

    let config = DriverConfig {
        plugin: Some("local".into()),
        plugin_config: Some(json!({ "watch": false })),
        root: Some(tmp.path().to_string_lossy().into_owned()),
        write_ttl_secs: 30,
        ..DriverConfig::default()
    };
    let driver = Driver::new(Role::Discover, config, PluginRegistry::with_builtins());
    driver.init().unwrap();

    let collect = Arc::new(Collect::default());
    let dispatcher = driver.dispatcher(collect.clone());
    assert_eq!(dispatcher.drain_pending(), 3);
    {
        let commands = collect.commands.lock().unwrap();
        let file = commands
            .iter()
            .find(|c| c.path == "/photos/2024/a.jpg")
            .unwrap();
        assert_eq!(file.size, Some(10));
        assert_eq!(file.write_ttl, 30);
    }

    fs::remove_file(tmp.path().join("photos/2024/a.jpg")).unwrap();
    let handler = driver.refresh_handler().unwrap();
    assert_eq!(
        handler.refresh("/photos/2024/a.jpg").unwrap(),
        crawlsync::RefreshOutcome::Removed
    );
    assert_eq!(dispatcher.drain_pending(), 1);
    assert_eq!(
        collect.commands.lock().unwrap().last().unwrap().verb,
        Verb::Delete
    );
    driver.shutdown();
}

#[cfg(unix)]
#[test]
fn symlink_loop_does_not_inflate_resync() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("a")).unwrap();
    fs::write(tmp.path().join("a/f.txt"), b"x").unwrap();
    std::os::unix::fs::symlink("..", tmp.path().join("a/up")).unwrap();

    let config = DriverConfig {
        plugin: Some("local".into()),
        plugin_config: Some(json!({ "watch": false })),
        root: Some(tmp.path().to_string_lossy().into_owned()),
        ..DriverConfig::default()
    };
    let driver = Driver::new(Role::Discover, config, PluginRegistry::with_builtins());
    driver.init().unwrap();

    let queue = driver.queue();
    let mut paths: Vec<String> = std::iter::from_fn(|| queue.take_one())
        .map(|r| r.path().to_string())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/a", "/a/f.txt", "/a/up"]);
    driver.shutdown();
}
