//! # Pod Bridge
//!
//! Relays pod controller telemetry to WebSocket subscribers and subscriber
//! relay commands back to the controller.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pod_bridge::bridge::{Bridge, BridgeSettings};
use pod_bridge::config::{Config, LoggingConfig};
use pod_bridge::serial::SerialConnector;
use pod_bridge::server::SubscriberServer;

/// Environment variable naming the config file when no argument is given
const ENV_CONFIG_PATH: &str = "POD_BRIDGE_CONFIG";

/// Main entry point for Pod Bridge
///
/// # Control Flow
///
/// 1. Load `.env`, then the configuration (file if given, else defaults),
///    then `POD_*` overrides
/// 2. Set up logging (stdout, plus a daily file if configured)
/// 3. Bind the subscriber server; failure here is fatal
/// 4. Run the upstream bridge and the server until Ctrl+C
///
/// # Errors
///
/// Returns error if the configuration is invalid or the listen port cannot be bound
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let path = config_path(std::env::args().nth(1), std::env::var(ENV_CONFIG_PATH).ok());
    let config = load_config(path)?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Pod Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let connector = SerialConnector::new(&config.serial.port, config.serial.baud_rate);
    let bridge = Arc::new(Bridge::new(Arc::new(connector), BridgeSettings::from_config(&config)));

    let listen = config.listen_address();
    let server = SubscriberServer::bind(&listen, Arc::clone(&bridge))
        .await
        .with_context(|| format!("Failed to bind subscriber server on {}", listen))?;

    let upstream = tokio::spawn(Arc::clone(&bridge).run());

    info!("Press Ctrl+C to exit");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Subscriber server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    upstream.abort();
    info!("Pod Bridge stopped");
    Ok(())
}

/// Pick the config file: CLI argument first, then the environment
fn config_path(arg: Option<String>, env: Option<String>) -> Option<PathBuf> {
    arg.or(env).filter(|p| !p.is_empty()).map(PathBuf::from)
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Config::from_env().context("Invalid configuration from environment");
    };

    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("Invalid configuration override from environment")?;
    Ok(config)
}

/// Set up tracing: stdout always, plus a daily-rolling file when a
/// directory is configured
///
/// # Returns
///
/// * `Result<Option<WorkerGuard>>` - Guard that must live as long as the
///   process for file logs to flush
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer();

    match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .try_init()
                .context("Failed to initialize logging")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .try_init()
                .context("Failed to initialize logging")?;
            Ok(None)
        }
    }
}
