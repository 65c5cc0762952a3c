pub mod command;
pub mod config;
pub mod event;
pub mod path;

pub use command::{CrawlCommand, EntryType, Verb, DEFAULT_WRITE_TTL_SECS};
pub use config::{
    normalize_plugin_config, Access, ConfigError, DriverConfig, PluginConfig, ResolvedPlugin,
    Role, DEFAULT_POLL_INTERVAL_MS, SECRETS_KEY, WORK_ROOT_KEY,
};
pub use event::{EventKind, EventRecord, Stat, StoreEntry, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
pub use path::{join_child, normalize_path, parent_of};
