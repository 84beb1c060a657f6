//! Kiosk control worker.
//!
//! All session operations funnel through one task that owns the
//! [`SessionManager`], so connect/disconnect/capture are serialised no
//! matter how many places produce commands (cycle driver, signal
//! handler). Frame delivery is unaffected; it runs inside the control
//! service.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use teecam_core::{Camera, CycleSettings};
use teecam_engine::RenderTarget;
use teecam_session::SessionManager;

use crate::capture::SnapshotStore;

// MARK: - KioskCommand

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskCommand {
    /// Switch the live view to the camera at this config index.
    Switch(usize),
    /// Capture a still of the current camera.
    Capture,
    /// Disconnect, wait for port drains, and exit the worker.
    Shutdown,
}

// MARK: - Worker

/// Spawn the worker that owns the session manager. Dropping the sender
/// without a `Shutdown` leaves port drains detached; prefer sending
/// `Shutdown` and awaiting the handle.
pub fn spawn(
    mut manager: SessionManager,
    mut store: SnapshotStore,
    cameras: Vec<Camera>,
    target: RenderTarget,
) -> (mpsc::Sender<KioskCommand>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(16);

    let handle = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                KioskCommand::Switch(index) => {
                    let Some(camera) = cameras.get(index) else {
                        warn!("switch to unknown camera index {}", index);
                        continue;
                    };
                    // Connect failures are retryable: the cycle driver
                    // will simply request the next switch on schedule.
                    match manager.connect(camera.clone(), &target).await {
                        Ok(()) => info!("live: {}", camera.name),
                        Err(e) => warn!("connect to {} failed: {}", camera.name, e),
                    }
                }
                KioskCommand::Capture => {
                    let Some(camera) = manager.current_camera() else {
                        warn!("capture requested with no live camera");
                        continue;
                    };
                    let camera = camera.clone();
                    let path = store.next_path(&camera);
                    match manager.capture(&path) {
                        Ok(()) => {
                            store.record_capture(&camera);
                            info!(
                                "snapshot saved: {} ({} today for {})",
                                path.display(),
                                store.count_today(&camera),
                                camera.short_label()
                            );
                        }
                        Err(e) => warn!("snapshot of {} failed: {}", camera.name, e),
                    }
                }
                KioskCommand::Shutdown => {
                    manager.shutdown().await;
                    break;
                }
            }
        }
        info!("kiosk worker exited");
    });

    (tx, handle)
}

// MARK: - Cycle driver

/// Unattended kiosk loop: switch to each camera in turn, take the
/// configured snapshots while dwelling, move on. Exits when the worker
/// side of the channel is gone.
pub async fn run_cycle(
    commands: mpsc::Sender<KioskCommand>,
    cycle: CycleSettings,
    camera_count: usize,
) {
    if camera_count == 0 {
        return;
    }
    let mut index = 0usize;
    loop {
        if commands.send(KioskCommand::Switch(index)).await.is_err() {
            return;
        }
        for _ in 0..cycle.snapshots_per_stop {
            tokio::time::sleep(Duration::from_secs(cycle.snapshot_interval_secs)).await;
            if commands.send(KioskCommand::Capture).await.is_err() {
                return;
            }
        }
        let spent = u64::from(cycle.snapshots_per_stop) * cycle.snapshot_interval_secs;
        let rest = cycle.dwell_secs.saturating_sub(spent).max(1);
        tokio::time::sleep(Duration::from_secs(rest)).await;
        index = (index + 1) % camera_count;
    }
}

// MARK: - Tests
