//! Thermal capture daemon for ESS Guardian.
//!
//! Reads full sensor frames, reduces the configured ROI to a hotspot
//! reading, and atomically replaces the status snapshot on every tick.
//!
//! # Architecture
//!
//! ```text
//! driver bridge (frame file) --> CaptureAggregator --> SnapshotStore (status JSON)
//! ```
//!
//! Sensor faults never stop the daemon: they are written into the snapshot
//! as `init_fail` / `frame_fail` errors and the sensor is re-opened.

mod capture_loop;
mod frame_file;

use ess_core::roi::FrameGeometry;
use ess_core::{
    CaptureAggregator, CaptureSettings, GuardianConfig, SnapshotStore, logging, shutdown,
};
use tracing::info;

use crate::frame_file::FrameFileConnector;

/// Application entry point.
///
/// Loads configuration, initializes logging, then runs the capture loop
/// until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GuardianConfig::load()?;
    logging::init(&config.logging);

    info!("ess-thermal starting");

    let settings = CaptureSettings::from_config(&config.thermal);
    info!(
        frame_path = %config.thermal.frame_path.display(),
        status_path = %config.thermal.status_path.display(),
        i2c_bus = settings.i2c_bus,
        refresh_rate = %settings.refresh_rate,
        roi_x0 = settings.roi.x0,
        roi_y0 = settings.roi.y0,
        roi_w = settings.roi.w,
        roi_h = settings.roi.h,
        "configuration loaded"
    );

    let connector =
        FrameFileConnector::new(config.thermal.frame_path.clone(), FrameGeometry::MLX90640);
    let mut aggregator = CaptureAggregator::new(connector, settings);
    let store = SnapshotStore::new(config.thermal.status_path.clone());

    let shutdown_rx = shutdown::signal_channel();
    capture_loop::run(&mut aggregator, &store, config.gate.offset(), shutdown_rx).await;

    info!("ess-thermal stopped");
    Ok(())
}
