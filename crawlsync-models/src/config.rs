use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::command::DEFAULT_WRITE_TTL_SECS;

/// Reserved plugin-config key carrying the driver's secrets.
pub const SECRETS_KEY: &str = "secrets";
/// Reserved plugin-config key carrying the resolved dataset root.
pub const WORK_ROOT_KEY: &str = "work_root";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Canonical plugin configuration once normalized.
pub type PluginConfig = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key `{0}`")]
    MissingKey(&'static str),
    #[error("malformed plugin configuration: {0}")]
    MalformedPluginConfig(String),
    #[error("unknown role `{0}` (expected discover, read, crawl or refresh)")]
    UnknownRole(String),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Store access requested at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Operating role of one driver process. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Discover,
    Read,
    Crawl,
    Refresh,
}

impl Role {
    pub fn access(self) -> Access {
        match self {
            Role::Read => Access::ReadWrite,
            Role::Discover | Role::Crawl | Role::Refresh => Access::ReadOnly,
        }
    }

    /// Whether the store's notifications are routed into the queue.
    pub fn watches(self) -> bool {
        matches!(self, Role::Discover | Role::Crawl)
    }

    /// Whether init seeds the queue with a full snapshot of the dataset.
    pub fn seeds_snapshot(self) -> bool {
        matches!(self, Role::Discover)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Discover => "discover",
            Role::Read => "read",
            Role::Crawl => "crawl",
            Role::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discover" => Ok(Role::Discover),
            "read" => Ok(Role::Read),
            "crawl" => Ok(Role::Crawl),
            "refresh" => Ok(Role::Refresh),
            _ => Err(ConfigError::UnknownRole(s.to_string())),
        }
    }
}

/// Driver configuration as read from disk.
///
/// `plugin`, `plugin_config` and `root` stay optional here so the driver can
/// report exactly which one is missing when it initializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub plugin: Option<String>,
    /// Either a table or a JSON-encoded string.
    #[serde(default)]
    pub plugin_config: Option<Value>,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub secrets: PluginConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_write_ttl_secs")]
    pub write_ttl_secs: u64,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

/// Plugin selection after validation and key injection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlugin {
    pub name: String,
    pub config: PluginConfig,
    pub root: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            role: None,
            plugin: None,
            plugin_config: None,
            root: None,
            secrets: PluginConfig::new(),
            poll_interval_ms: default_poll_interval_ms(),
            write_ttl_secs: default_write_ttl_secs(),
            log_path: default_log_path(),
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn write_ttl(&self) -> Duration {
        Duration::from_secs(self.write_ttl_secs)
    }

    /// Validate the plugin keys and build the configuration handed to the
    /// plugin loader, with `secrets` and `work_root` injected.
    pub fn resolve_plugin(&self) -> Result<ResolvedPlugin, ConfigError> {
        let name = self
            .plugin
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingKey("plugin"))?;
        let raw = self
            .plugin_config
            .as_ref()
            .ok_or(ConfigError::MissingKey("plugin_config"))?;
        let root = self
            .root
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::MissingKey("root"))?;

        let mut config = normalize_plugin_config(raw)?;
        config.insert(
            SECRETS_KEY.to_string(),
            Value::Object(self.secrets.clone()),
        );
        config.insert(WORK_ROOT_KEY.to_string(), Value::String(root.to_string()));

        Ok(ResolvedPlugin {
            name: name.to_string(),
            config,
            root: root.to_string(),
        })
    }
}

/// Accept a plugin configuration given either as a mapping or as a
/// JSON-encoded string and return the mapping.
pub fn normalize_plugin_config(raw: &Value) -> Result<PluginConfig, ConfigError> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ConfigError::MalformedPluginConfig(format!(
                "encoded plugin config must be a JSON object, got {}",
                json_type_name(&other)
            ))),
            Err(e) => Err(ConfigError::MalformedPluginConfig(format!(
                "encoded plugin config is not valid JSON: {e}"
            ))),
        },
        other => Err(ConfigError::MalformedPluginConfig(format!(
            "expected a table or a JSON string, got {}",
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_write_ttl_secs() -> u64 {
    DEFAULT_WRITE_TTL_SECS
}

fn default_log_path() -> PathBuf {
    PathBuf::from("crawlsync.log")
}
