use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use models::{DriverConfig, Role};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use utilities::{BackingStore, PluginRegistry};

use crate::dispatcher::{CrawlDispatcher, Ingest};
use crate::error::DriverError;
use crate::queue::EventQueue;
use crate::refresh::RefreshHandler;
use crate::resync::{ResyncReport, ResyncWalker};
use crate::sink::NotificationSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    ShutDown,
}

/// Per-process context: owns the queue, the sink and the store handle, and
/// applies the role's startup policy.
pub struct Driver {
    role: Role,
    config: DriverConfig,
    registry: PluginRegistry,
    queue: Arc<EventQueue>,
    sink: NotificationSink,
    state: Mutex<DriverState>,
    handle: Mutex<Option<Arc<dyn BackingStore>>>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("queue_depth", &self.queue.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Driver {
    pub fn new(role: Role, config: DriverConfig, registry: PluginRegistry) -> Self {
        let queue = Arc::new(EventQueue::new());
        let sink = NotificationSink::new(Arc::clone(&queue));
        Driver {
            role,
            config,
            registry,
            queue,
            sink,
            state: Mutex::new(DriverState::Uninitialized),
            handle: Mutex::new(None),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        *lock(&self.state)
    }

    fn set_state(&self, state: DriverState) {
        *lock(&self.state) = state;
    }

    pub fn queue(&self) -> Arc<EventQueue> {
        Arc::clone(&self.queue)
    }

    pub fn sink(&self) -> NotificationSink {
        self.sink.clone()
    }

    /// Connect to the backing store. A no-op while a handle is live.
    ///
    /// Concurrent callers are serialized on the handle lock, so the connect
    /// sequence runs at most once per live handle.
    pub fn init(&self) -> Result<(), DriverError> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            debug!("Driver already initialized; skipping");
            return Ok(());
        }

        self.set_state(DriverState::Initializing);
        let store = match self.open_store() {
            Ok(store) => store,
            Err(e) => {
                error!("Driver init for role {} failed: {e}", self.role);
                self.set_state(DriverState::Failed);
                return Err(e);
            }
        };
        *handle = Some(Arc::clone(&store));
        self.set_state(DriverState::Ready);
        info!("Driver ready (role {})", self.role);

        if self.role.seeds_snapshot() {
            let report = self.seed(store);
            debug!(?report, "initial resync complete");
        }
        Ok(())
    }

    fn open_store(&self) -> Result<Arc<dyn BackingStore>, DriverError> {
        let resolved = self.config.resolve_plugin()?;
        info!(
            "Loading plugin `{}` for root {} (access {:?})",
            resolved.name,
            resolved.root,
            self.role.access()
        );
        let store = self.registry.load(&resolved.name, &resolved.config)?;
        if self.role.watches() {
            store.set_notification_callback(Arc::new(self.sink.clone()));
        }
        store
            .connect(self.role.access())
            .map_err(DriverError::Connect)?;

        if let Err(e) = verify_root(store.as_ref(), &resolved.root) {
            if let Err(close_err) = store.close() {
                warn!("Failed to close store after root check: {close_err}");
            }
            return Err(e);
        }
        Ok(store)
    }

    fn seed(&self, store: Arc<dyn BackingStore>) -> ResyncReport {
        info!("Seeding queue with a full resync of the dataset");
        ResyncWalker::new(store, self.sink.clone()).resync("/")
    }

    /// Close the store and drop the handle. A no-op without a live handle;
    /// close failures are logged and swallowed.
    pub fn shutdown(&self) {
        let mut handle = lock(&self.handle);
        let Some(store) = handle.take() else {
            debug!("Driver not initialized; nothing to shut down");
            return;
        };
        if let Err(e) = store.close() {
            warn!("Error while closing backing store: {e}");
        }
        self.set_state(DriverState::ShutDown);
        info!("Driver shut down (role {})", self.role);
    }

    pub fn store(&self) -> Result<Arc<dyn BackingStore>, DriverError> {
        lock(&self.handle)
            .as_ref()
            .map(Arc::clone)
            .ok_or(DriverError::NotInitialized)
    }

    /// Dispatcher over this driver's queue, configured from the driver's
    /// poll interval and write TTL. Uses the live store, if any, for records
    /// that arrive without metadata.
    pub fn dispatcher(&self, ingest: Arc<dyn Ingest>) -> CrawlDispatcher {
        let dispatcher = CrawlDispatcher::new(self.queue(), ingest)
            .with_poll_interval(self.config.poll_interval())
            .with_write_ttl(self.config.write_ttl());
        match self.store() {
            Ok(store) => dispatcher.with_store(store),
            Err(_) => dispatcher,
        }
    }

    pub fn refresh_handler(&self) -> Result<RefreshHandler, DriverError> {
        Ok(RefreshHandler::new(self.store()?, self.sink()))
    }
}

fn verify_root(store: &dyn BackingStore, root: &str) -> Result<(), DriverError> {
    let check = |result: std::io::Result<bool>| {
        result.map_err(|source| DriverError::Store {
            path: "/".to_string(),
            source,
        })
    };
    if !check(store.exists("/"))? {
        return Err(DriverError::RootMissing(root.to_string()));
    }
    if !check(store.is_dir("/"))? {
        return Err(DriverError::RootNotDirectory(root.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{ConfigError, EventKind};
    use serde_json::json;
    use utilities::MemoryStore;

    fn config() -> DriverConfig {
        DriverConfig {
            plugin: Some("shared".into()),
            plugin_config: Some(json!({})),
            root: Some("/data".into()),
            ..DriverConfig::default()
        }
    }

    fn registry_with(store: &MemoryStore) -> PluginRegistry {
        let store = store.clone();
        let mut registry = PluginRegistry::new();
        registry.register("shared", move |_| {
            Ok(Arc::new(store.clone()) as Arc<dyn BackingStore>)
        });
        registry
    }

    #[test]
    fn missing_keys_fail_in_order() {
        let store = MemoryStore::new();
        for (cfg, key) in [
            (
                DriverConfig {
                    plugin: None,
                    ..config()
                },
                "plugin",
            ),
            (
                DriverConfig {
                    plugin_config: None,
                    ..config()
                },
                "plugin_config",
            ),
            (
                DriverConfig {
                    root: None,
                    ..config()
                },
                "root",
            ),
        ] {
            let driver = Driver::new(Role::Crawl, cfg, registry_with(&store));
            match driver.init() {
                Err(DriverError::Config(ConfigError::MissingKey(k))) => assert_eq!(k, key),
                other => panic!("expected missing {key}, got {other:?}"),
            }
            assert_eq!(driver.state(), DriverState::Failed);
        }
        assert_eq!(store.connect_count(), 0);
    }

    #[test]
    fn unknown_plugin_is_reported() {
        let driver = Driver::new(
            Role::Crawl,
            DriverConfig {
                plugin: Some("nope".into()),
                ..config()
            },
            PluginRegistry::with_builtins(),
        );
        assert!(matches!(driver.init(), Err(DriverError::PluginNotFound(n)) if n == "nope"));
        assert_eq!(driver.state(), DriverState::Failed);
    }

    #[test]
    fn connect_failure_leaves_driver_failed() {
        let store = MemoryStore::new();
        store.set_fail_connect(true);
        let driver = Driver::new(Role::Crawl, config(), registry_with(&store));
        assert!(matches!(driver.init(), Err(DriverError::Connect(_))));
        assert_eq!(driver.state(), DriverState::Failed);
        assert!(matches!(driver.store(), Err(DriverError::NotInitialized)));
    }

    #[test]
    fn role_decides_access_and_watching() {
        let store = MemoryStore::new();
        let driver = Driver::new(Role::Crawl, config(), registry_with(&store));
        driver.init().unwrap();
        assert!(driver.queue().is_empty());

        store.external_write("/seen.txt", b"x");
        let record = driver.queue().take_one().unwrap();
        assert_eq!(record.kind(), EventKind::Added);
        assert_eq!(record.path(), "/seen.txt");

        let refresh_store = MemoryStore::new();
        let refresh = Driver::new(Role::Refresh, config(), registry_with(&refresh_store));
        refresh.init().unwrap();
        refresh_store.external_write("/unseen.txt", b"x");
        assert!(refresh.queue().is_empty());
    }

    #[test]
    fn shutdown_allows_reinit() {
        let store = MemoryStore::new();
        let driver = Driver::new(Role::Read, config(), registry_with(&store));
        driver.shutdown();
        assert_eq!(store.close_count(), 0);

        driver.init().unwrap();
        driver.init().unwrap();
        assert_eq!(store.connect_count(), 1);
        driver.shutdown();
        driver.shutdown();
        assert_eq!(store.close_count(), 1);
        assert_eq!(driver.state(), DriverState::ShutDown);

        driver.init().unwrap();
        assert_eq!(store.connect_count(), 2);
        assert_eq!(driver.state(), DriverState::Ready);
    }
}
