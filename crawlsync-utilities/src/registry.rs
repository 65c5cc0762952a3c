use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use models::PluginConfig;
use thiserror::Error;

use crate::local::LocalStore;
use crate::memory::MemoryStore;
use crate::store::BackingStore;

pub type PluginFactory =
    Arc<dyn Fn(&PluginConfig) -> io::Result<Arc<dyn BackingStore>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no backing-store plugin named `{0}`")]
    NotFound(String),
    #[error("failed to load plugin `{name}`: {source}")]
    Load {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Maps plugin names to store factories.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `local` and `memory` plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("local", |cfg| {
            Ok(Arc::new(LocalStore::from_config(cfg)?) as Arc<dyn BackingStore>)
        });
        registry.register("memory", |cfg| {
            Ok(Arc::new(MemoryStore::from_config(cfg)?) as Arc<dyn BackingStore>)
        });
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginConfig) -> io::Result<Arc<dyn BackingStore>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn load(
        &self,
        name: &str,
        config: &PluginConfig,
    ) -> Result<Arc<dyn BackingStore>, PluginError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        factory(config).map_err(|source| PluginError::Load {
            name: name.to_string(),
            source,
        })
    }
}
