//! qsrd: pickup-code relay daemon
//!
//! Usage:
//!   qsrd [--config /etc/qsr/qsrd.toml] [--listen 127.0.0.1:8040]
//!
//! Serves the relay HTTP API and runs the periodic cleanup sweep. All state
//! is in memory; restarting the daemon drops every pending transfer, which
//! is acceptable for a TTL-bounded drop box.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;

use qsr_core::config::QsrConfig;
use qsr_relay::http::AppState;
use qsr_relay::{CleanupScheduler, PickupCodeRegistry, RelayService, RelayStore};

#[derive(Parser, Debug)]
#[command(name = "qsrd", version, about = "Pickup-code relay daemon")]
struct Cli {
    /// Path to qsrd.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "QSR_CONFIG",
        default_value = "/etc/qsr/qsrd.toml"
    )]
    config: PathBuf,

    /// Listen address override (default from config)
    #[arg(long, env = "QSR_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "QSR_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "QSR_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "qsrd starting"
    );

    let config = load_config(&cli.config).await?;
    let listen = cli.listen.unwrap_or_else(|| config.server.listen.clone());

    let service = Arc::new(RelayService::new(
        RelayStore::new(),
        PickupCodeRegistry::new(
            &config.relay.dedup_pepper,
            config.relay.lookup_generation_attempts,
        ),
    ));

    let cleanup = CleanupScheduler::new(
        Arc::clone(&service),
        Duration::from_secs(config.relay.cleanup_interval_secs.max(1)),
    );
    tokio::spawn(cleanup.run());

    let state = AppState {
        service,
        config: Arc::new(config.relay),
    };
    qsr_relay::http::serve(&listen, state).await
}

async fn load_config(path: &PathBuf) -> Result<QsrConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(QsrConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
