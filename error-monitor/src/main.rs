use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use error_monitor::api::{ApiServer, ApiServerConfig, AppState};
use error_monitor::config::DEFAULT_CONFIG_FILE;
use error_monitor::{ExceptionMonitor, MonitorConfig, logging};

/// Error report monitor with batched SMTP notifications.
#[derive(Debug, Parser)]
#[command(name = "error-monitor", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "ERROR_MONITOR_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, env = "ERROR_MONITOR_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads its env fallbacks
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guard =
        logging::init_logging(args.log_dir.as_deref()).context("Failed to initialize logging")?;

    let config = MonitorConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let server_config = ApiServerConfig::from(&config.server);

    let mut monitor = ExceptionMonitor::new(config);
    monitor.initialize();
    let monitor = Arc::new(monitor);

    let state = AppState::new(monitor.clone());
    let server = ApiServer::new(server_config, state.clone());
    let cancel_token = server.cancel_token();

    if let Some(dir) = args.log_dir.clone() {
        logging::start_retention_cleanup(dir, cancel_token.child_token());
    }

    tokio::spawn(wait_for_shutdown_signal(cancel_token.clone()));

    let served = server.run().await;
    // Stop accepting work even when the server exited on its own
    cancel_token.cancel();
    if let Err(e) = &served {
        error!(error = %e, "API server stopped with an error");
    }

    state.drain_reports().await;
    monitor.terminate().await;
    info!("error-monitor stopped");

    served.context("API server failed")
}

async fn wait_for_shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT (Ctrl+C) received, initiating graceful shutdown."),
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown."),
    }
    cancel_token.cancel();
}
