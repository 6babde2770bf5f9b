pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod imaging;

pub use error::{AgentError, Result};

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use client::{DuetClient, MjpegCamera, PrintWatchClient};
use config::SettingsStore;
use engine::{LoopHandler, Monitor, RestartPolicy};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = config::default_settings_path();
    let mut settings = config::load_or_init(&path)
        .with_context(|| format!("loading settings from {:?}", path))?;

    let device = Arc::new(DuetClient::new(&settings.device_addr)?);
    if settings.printer_id.is_empty() {
        settings.printer_id = device.fetch_unique_id().await;
        info!("Assigned printer id {}", settings.printer_id);
        if let Err(e) = config::save_settings(&path, &settings) {
            warn!("Could not persist printer id: {}", e);
        }
    }

    let camera = Arc::new(MjpegCamera::new(&settings.camera_url)?);
    if settings.camera_url.is_empty() {
        warn!("No camera_url configured in {:?}", path);
    } else {
        match camera.probe().await {
            Ok(true) => info!("Camera answering at {}", settings.camera_url),
            Ok(false) => warn!("Camera at {} did not return a JPEG", settings.camera_url),
            Err(e) => warn!("Camera probe failed: {}", e),
        }
    }

    let autostart = settings.monitoring_on;
    let store = Arc::new(SettingsStore::new(settings)?);
    let service = Arc::new(PrintWatchClient::new(store.clone())?);

    let handler = LoopHandler::new(camera, device, service, store.clone());
    let monitor = Monitor::new(handler, RestartPolicy::default());

    if autostart {
        monitor.start();
    } else {
        info!("Monitoring is off; set monitoring_on in {:?} to enable", path);
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutting down");
    // Snapshot first so the monitoring flag survives the stop below
    let last = store.snapshot();
    monitor.stop().await;
    if let Err(e) = config::save_settings(&path, &last) {
        warn!("Could not save settings on exit: {}", e);
    }
    Ok(())
}
