use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use teecam_control::sim::{SimOptions, SimulatedControlService};
use teecam_control::ControlService;
use teecam_core::KioskConfig;
use teecam_engine::{EngineRuntime, GstEngine, RenderEngine, RenderTarget};
use teecam_session::SessionManager;

mod capture;
mod worker;

use capture::SnapshotStore;
use worker::KioskCommand;

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG=debug for more detail, GST_DEBUG=3 for GStreamer.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("TeeCam kiosk v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "teecam.json".into());
    let config = KioskConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;
    info!(
        "{} camera(s) configured, snapshots under {}",
        config.cameras.len(),
        config.capture.root_dir.display()
    );

    // Global engine initialisation runs exactly once, before any session
    // manager exists.
    let runtime = EngineRuntime::acquire()?;
    let engine: Arc<dyn RenderEngine> = Arc::new(GstEngine::new(runtime, config.engine.clone())?);

    // The simulator accepts every configured host with the configured
    // credentials; a vendor-SDK binding slots in behind the same trait.
    // Decoded video needs real cameras, since the simulator only feeds
    // synthetic packets.
    let hosts: Vec<String> = config.cameras.iter().map(|c| c.host.clone()).collect();
    let control: Arc<dyn ControlService> = Arc::new(SimulatedControlService::new(
        hosts,
        config.credentials.clone(),
        SimOptions::default(),
    ));

    let manager = SessionManager::new(
        control,
        engine,
        config.credentials.clone(),
        &config.engine,
    );
    let store = SnapshotStore::new(config.capture.root_dir.clone());

    let (commands, worker_handle) = worker::spawn(
        manager,
        store,
        config.cameras.clone(),
        RenderTarget::Screen,
    );
    let driver = tokio::spawn(worker::run_cycle(
        commands.clone(),
        config.cycle.clone(),
        config.cameras.len(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");

    driver.abort();
    if commands.send(KioskCommand::Shutdown).await.is_err() {
        error!("kiosk worker already gone");
    }
    let _ = worker_handle.await;

    info!("TeeCam kiosk exited cleanly.");
    Ok(())
}
