use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use spotter_server::ServerConfig;
use spotter_telemetry::{init_telemetry, spotter_dir, TelemetryConfig};

/// Relay that hosts live training session documents for trainer and
/// client apps.
#[derive(Debug, Parser)]
#[command(name = "spotter", version)]
struct Args {
    #[arg(long, env = "SPOTTER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SPOTTER_PORT", default_value_t = 9190)]
    port: u16,

    /// Session database. Defaults to ~/.spotter/database/sessions.db.
    #[arg(long, env = "SPOTTER_DB")]
    db: Option<PathBuf>,

    /// Keep sessions in memory only.
    #[arg(long, conflicts_with = "db")]
    in_memory: bool,

    #[arg(long, env = "SPOTTER_MAX_SEND_QUEUE", default_value_t = 256)]
    max_send_queue: usize,

    /// Default level; RUST_LOG takes precedence.
    #[arg(long, env = "SPOTTER_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Per-module override, e.g. `spotter_engine=debug`. Repeatable.
    #[arg(long = "module-level", value_parser = parse_module_level)]
    module_levels: Vec<(String, Level)>,

    /// Skip persisting warn+ logs to SQLite.
    #[arg(long, env = "SPOTTER_NO_LOG_DB")]
    no_log_db: bool,

    #[arg(long, env = "SPOTTER_LOG_DB")]
    log_db: Option<PathBuf>,
}

fn parse_module_level(raw: &str) -> Result<(String, Level), String> {
    let (module, level) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MODULE=LEVEL, got {raw:?}"))?;
    let level = level
        .parse::<Level>()
        .map_err(|e| format!("invalid level {level:?}: {e}"))?;
    Ok((module.to_string(), level))
}

impl Args {
    fn telemetry(&self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            log_level: self.log_level,
            module_levels: self.module_levels.clone(),
            log_to_sqlite: !self.no_log_db,
            log_db_path: self.log_db.clone().unwrap_or(defaults.log_db_path),
        }
    }

    fn server(&self) -> ServerConfig {
        let db_path = if self.in_memory {
            None
        } else {
            Some(
                self.db
                    .clone()
                    .unwrap_or_else(|| spotter_dir().join("database/sessions.db")),
            )
        };
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_send_queue: self.max_send_queue,
            db_path,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let telemetry = Arc::new(init_telemetry(args.telemetry()));

    let config = args.server();
    let store = config
        .open_store()
        .with_context(|| format!("opening session store at {:?}", config.db_path))?;
    let handle = spotter_server::start_with_telemetry(config, Arc::new(store), telemetry)
        .await
        .context("starting relay")?;

    tracing::info!(port = handle.port, "spotter ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}
