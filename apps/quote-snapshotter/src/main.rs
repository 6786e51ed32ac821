//! Quote Snapshotter Binary
//!
//! Runs the snapshot pipeline until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! QUOTE_SNAPSHOTTER_CONFIG=quote-snapshotter.yaml cargo run --bin quote-snapshotter
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_SNAPSHOTTER_CONFIG`: YAML config path (default: quote-snapshotter.yaml)
//! - `ALPACA_KEY` / `ALPACA_SECRET`: usually referenced from the config as `${ALPACA_KEY}`
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: cream-quote-snapshotter)
//! - `RUST_LOG`: Log filter (overrides `logging.level`)

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use quote_snapshotter::infrastructure::config::CONFIG_PATH_ENV;
use quote_snapshotter::infrastructure::telemetry;
use quote_snapshotter::{
    Config, LifecycleController, LifecycleReport, PidFile, SnapshotLayout, SnapshotWriter,
    TelemetryConfig, WebSocketConfig, WebSocketQuoteSource, init_metrics, load_config,
    load_positions,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let config_path = std::env::var(CONFIG_PATH_ENV).ok();
    let config = load_config(config_path.as_deref()).context("failed to load configuration")?;

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init(&TelemetryConfig::from_env(&config.logging.level));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Quote Snapshotter");

    init_metrics(config.metrics.port).context("failed to start metrics exporter")?;
    log_config(&config);

    let portfolio = load_positions(&config.portfolio.file).context("failed to load positions")?;
    let instruments = config.instruments(&portfolio);
    let portfolio = Arc::new(portfolio);

    let _pid_file = config
        .lifecycle
        .pid_file
        .as_ref()
        .map(PidFile::create)
        .transpose()
        .context("failed to write PID file")?;

    let layout = SnapshotLayout::from_config(&config.output)?;
    let writer = SnapshotWriter::new(layout);
    writer
        .prepare(Utc::now())
        .await
        .context("failed to prepare snapshot logs")?;

    let source = WebSocketQuoteSource::new(WebSocketConfig::from_streaming(&config.streaming));

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let controller = LifecycleController::new(
        portfolio,
        instruments,
        source,
        Arc::new(writer),
        config.lifecycle_settings(),
        shutdown_token,
    );

    match controller.run().await {
        Ok(report) => {
            log_report(&report);
            tracing::info!("Quote Snapshotter stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Quote Snapshotter failed");
            Err(e.into())
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        portfolio = %config.portfolio.file.display(),
        output = %config.output.directory.display(),
        timezone = %config.output.timezone,
        cadence_secs = config.schedule.cadence_secs,
        shutdown_grace_secs = config.schedule.shutdown_grace_secs,
        resubscribe = config.streaming.resubscribe,
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );
    tracing::debug!(
        url = %config.streaming.url,
        authenticated = config.streaming.credentials().is_some(),
        "Quote stream endpoint"
    );
}

/// Log how the run ended.
fn log_report(report: &LifecycleReport) {
    let cycles = report.cycles.unwrap_or_default();
    tracing::info!(
        reached_running = report.reached_running,
        cycles = cycles.cycles,
        valuation_rows = cycles.valuation_rows,
        mark_rows = cycles.mark_rows,
        write_failures = cycles.write_failures,
        ingestion = ?report.ingestion,
        aborted = ?report.aborted,
        "Run summary"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel the shared token.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
