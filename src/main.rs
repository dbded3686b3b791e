//! AgroSense service entry point
//!
//! Loads configuration, opens storage, restores the developer mode gate and
//! serves the HTTP API and live channel until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use agrosense::api::{self, ApiState};
use agrosense::broadcast::Broadcaster;
use agrosense::config::AppConfig;
use agrosense::mode_gate::ModeGate;
use agrosense::pipeline::{IngestionPipeline, PipelineSettings};
use agrosense::predictor::HttpPredictor;
use agrosense::storage::SledStore;

#[derive(Parser, Debug)]
#[command(name = "agrosense")]
#[command(about = "AgroSense environmental telemetry ingestion service")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to a TOML config file (takes precedence over AGROSENSE_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the storage directory (default: "./data")
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Reset all persistent data (readings and developer mode state) on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,
}

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Remove the data directory and all its contents.
fn reset_data_directory(data_path: &Path) -> Result<()> {
    if !data_path.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!("  RESET_DB DETECTED - WIPING ALL PERSISTENT DATA");
    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!("  Removing: {}", data_path.display());

    std::fs::remove_dir_all(data_path).context("Failed to remove data directory")?;

    warn!("  Data directory removed successfully.");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Wire storage, gate, predictor, broadcaster and pipeline into API state.
fn build_state(config: AppConfig) -> Result<ApiState> {
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let store = Arc::new(
        SledStore::open(data_dir)
            .with_context(|| format!("Failed to open storage at {}", data_dir.display()))?,
    );

    let gate = Arc::new(ModeGate::restore(
        store.clone(),
        config.mode_gate.window(),
        config.correction.enabled_on_startup,
    ));

    let predictor = Arc::new(
        HttpPredictor::new(&config.predictor.url, config.predictor.timeout())
            .context("Failed to build predictor client")?,
    );
    info!(url = %predictor.url(), timeout_secs = config.predictor.timeout_secs, "Predictor client ready");

    let broadcaster = Arc::new(Broadcaster::new(store.clone()));
    let pipeline = Arc::new(IngestionPipeline::new(
        store,
        gate.clone(),
        predictor,
        broadcaster.clone(),
        PipelineSettings::from_config(&config),
    ));

    Ok(ApiState::new(pipeline, gate, broadcaster, Arc::new(config)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let mut config = AppConfig::load(args.config.as_deref());
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(anyhow::anyhow!("invalid configuration"));
    }

    // Reset DB check, before storage is opened
    if should_reset_db(args.reset_db) {
        reset_data_directory(&config.storage.data_dir)?;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  AgroSense - Environmental Telemetry Ingestion");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "Correction policy: {:?} | plant: {} | developer mode window: {}s",
        config.correction.policy, config.predictor.plant_profile, config.mode_gate.window_secs
    );

    let server_addr = config.server.addr.clone();
    let state = build_state(config)?;
    let app = api::create_app(state);

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind {server_addr}"))?;
    info!("Listening on http://{}", server_addr);

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("[HttpServer] Received shutdown signal");
        })
        .await
        .context("HTTP server error")?;

    info!("[HttpServer] Graceful shutdown complete");
    Ok(())
}
