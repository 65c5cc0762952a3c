use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use crawlsync::config::{init_config_template, validate_config, Cli, Command};
use crawlsync::{Driver, JsonLinesIngest};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use utilities::{init_logging, PluginRegistry};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Command::Init { force } = &cli.command {
        init_config_template(&cli.config, *force)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    let (role, cfg) = cli
        .load_config()
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_logging(&cfg.log_path)?;
    info!(
        "{} {} starting (role {role})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let registry = PluginRegistry::with_builtins();
    match &cli.command {
        Command::Init { .. } => Ok(()),
        Command::Validate => {
            let resolved = validate_config(&cfg)?;
            if !registry.contains(&resolved.name) {
                anyhow::bail!(
                    "unknown plugin `{}` (available: {})",
                    resolved.name,
                    registry.names().join(", ")
                );
            }
            println!("OK");
            Ok(())
        }
        Command::Run { max_commands } => {
            let driver = Driver::new(role, cfg, registry);
            driver.init()?;
            let cancel = CancellationToken::new();
            let ingest = JsonLinesIngest::new(io::stdout()).cancel_on_failure(cancel.clone());
            let dispatcher = driver.dispatcher(Arc::new(ingest));
            let mut sent = 0u64;
            while max_commands.map_or(true, |max| sent < max) {
                if !dispatcher.next_command(&cancel) {
                    break;
                }
                sent += 1;
            }
            info!("Dispatched {sent} command(s)");
            driver.shutdown();
            Ok(())
        }
        Command::Refresh { path } => {
            let driver = Driver::new(role, cfg, registry);
            driver.init()?;
            let outcome = driver.refresh_handler()?.refresh(path)?;
            info!(?outcome, "Refreshed {path}");
            let dispatcher = driver.dispatcher(Arc::new(JsonLinesIngest::new(io::stdout())));
            dispatcher.drain_pending();
            driver.shutdown();
            Ok(())
        }
        Command::Read {
            path,
            offset,
            length,
        } => {
            let (Some(offset), Some(length)) = (*offset, *length) else {
                error!("read of {path} requires both --offset and --length");
                std::process::exit(2);
            };
            let driver = Driver::new(role, cfg, registry);
            driver.init()?;
            let result = driver.refresh_handler()?.read(path, offset, length);
            let dispatcher = driver.dispatcher(Arc::new(JsonLinesIngest::new(io::stderr())));
            dispatcher.drain_pending();
            driver.shutdown();
            match result {
                Ok(data) => {
                    let mut stdout = io::stdout().lock();
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                    Ok(())
                }
                Err(e) => {
                    error!("{e}");
                    std::process::exit(e.code());
                }
            }
        }
        Command::Status => {
            let driver = Driver::new(role, cfg, registry);
            driver.init()?;
            let dispatcher = driver.dispatcher(Arc::new(JsonLinesIngest::new(io::sink())));
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "role": driver.role(),
                    "state": driver.state(),
                    "stats": dispatcher.stats(),
                }))?
            );
            driver.shutdown();
            Ok(())
        }
    }
}
