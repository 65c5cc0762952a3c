use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use models::{ConfigError, DriverConfig, ResolvedPlugin, Role};

pub const DEFAULT_CONFIG_PATH: &str = "crawlsync.toml";

/// Starting point written by `crawlsync init`.
pub const CONFIG_TEMPLATE: &str = r#"# Role of this process: discover, crawl, read or refresh
role = "discover"

# Backing-store plugin and the dataset root it serves
plugin = "local"
root = "/srv/dataset"

# Dispatcher tuning
poll_interval_ms = 1000
write_ttl_secs = 300

log_path = "crawlsync.log"

# Plugin options; may also be given as a JSON string:
# plugin_config = '{"watch": true}'
[plugin_config]
watch = true

# Passed to the plugin under the `secrets` key
[secrets]
"#;

#[derive(Debug, Parser)]
#[command(
    name = "crawlsync",
    version,
    about = "Streams backing-store changes to a crawler as metadata commands"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Role for this process; overrides the config file
    #[arg(long, global = true, value_parser = parse_role_arg)]
    pub role: Option<Role>,

    /// Path to the log file; overrides the config file
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize the driver and stream crawl commands to stdout as JSON lines
    Run {
        /// Stop after this many commands
        #[arg(long)]
        max_commands: Option<u64>,
    },
    /// Revalidate one path and print the resulting commands
    Refresh { path: String },
    /// Read a byte range through the store and print it to stdout
    Read {
        path: String,
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        length: Option<u64>,
    },
    /// Check the configuration without connecting
    Validate,
    /// Write a template configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Initialize and print dispatcher counters as JSON
    Status,
}

fn parse_role_arg(raw: &str) -> Result<Role, String> {
    raw.parse::<Role>().map_err(|e| e.to_string())
}

impl Cli {
    /// Load the config file and apply command-line overrides.
    pub fn load_config(&self) -> Result<(Role, DriverConfig), ConfigError> {
        let config = DriverConfig::load(&self.config)?;
        self.apply_overrides(config)
    }

    pub fn apply_overrides(
        &self,
        mut config: DriverConfig,
    ) -> Result<(Role, DriverConfig), ConfigError> {
        if let Some(log_path) = &self.log_path {
            config.log_path = log_path.clone();
        }
        let role = self
            .role
            .or(config.role)
            .ok_or(ConfigError::MissingKey("role"))?;
        config.role = Some(role);
        Ok((role, config))
    }
}

/// Everything `init` would check before touching the store.
pub fn validate_config(config: &DriverConfig) -> Result<ResolvedPlugin, ConfigError> {
    if config.role.is_none() {
        return Err(ConfigError::MissingKey("role"));
    }
    config.resolve_plugin()
}

pub fn init_config_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
