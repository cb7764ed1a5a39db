//! Fixed-period capture loop.

use chrono::{FixedOffset, Utc};
use ess_core::shutdown;
use ess_core::{CaptureAggregator, SensorConnector, SnapshotStore};
use tokio::sync::watch;
use tracing::{info, warn};

/// Tick until shutdown, writing one snapshot per tick.
///
/// Snapshot timestamps carry `offset`. The sensor is released before
/// returning. Returns the number of ticks run.
pub async fn run<C: SensorConnector>(
    aggregator: &mut CaptureAggregator<C>,
    store: &SnapshotStore,
    offset: FixedOffset,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut ticks = 0u64;
    info!(
        path = %store.path().display(),
        period_ms = u64::try_from(aggregator.settings().tick_period.as_millis()).unwrap_or(u64::MAX),
        "capture loop started"
    );

    while !shutdown::requested(&shutdown_rx) {
        let outcome = aggregator.tick(Utc::now().with_timezone(&offset));
        ticks = ticks.saturating_add(1);

        if let Err(e) = store.write(&outcome.snapshot) {
            warn!(error = %e, "snapshot write failed");
        }

        tokio::select! {
            () = tokio::time::sleep(outcome.delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    aggregator.release();
    info!(ticks, "capture loop stopped");
    ticks
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::time::Duration;

    use ess_core::config::ThermalConfig;
    use ess_core::roi::FrameGeometry;
    use ess_core::{CaptureSettings, RefreshRate};

    use super::*;
    use crate::frame_file::FrameFileConnector;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(32_400).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn writes_snapshots_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let frame_path = dir.path().join("mlx.frame");
        let hot: Vec<String> = (0..FrameGeometry::MLX90640.pixel_count())
            .map(|i| if i == 302 { "44.0".to_owned() } else { "22.0".to_owned() })
            .collect();
        std::fs::write(&frame_path, hot.join(" ")).unwrap();

        let settings = CaptureSettings::from_config(&ThermalConfig::default());
        assert_eq!(settings.refresh_rate, RefreshRate::Hz2);
        let mut aggregator = CaptureAggregator::new(
            FrameFileConnector::new(frame_path, FrameGeometry::MLX90640),
            settings,
        );
        let store = SnapshotStore::new(dir.path().join("status.json"));

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            tx.send(true).unwrap();
        });

        let ticks = run(&mut aggregator, &store, kst(), rx).await;
        stopper.await.unwrap();

        // Ticks at 0 s, 1 s, 2 s.
        assert_eq!(ticks, 3);
        assert!(!aggregator.has_sensor());
        let snap = store.read().unwrap().unwrap();
        assert_eq!(snap.max_c(), Some(44.0));
        assert_eq!(snap.timestamp.unwrap().offset(), &kst());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_frame_file_writes_init_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = CaptureAggregator::new(
            FrameFileConnector::new(dir.path().join("absent"), FrameGeometry::MLX90640),
            CaptureSettings::from_config(&ThermalConfig::default()),
        );
        let store = SnapshotStore::new(dir.path().join("status.json"));

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            tx.send(true).unwrap();
        });

        // Init retries every 500 ms: 0, 0.5, 1.0 s.
        let ticks = run(&mut aggregator, &store, kst(), rx).await;
        assert_eq!(ticks, 3);
        let snap = store.read().unwrap().unwrap();
        assert!(snap.error().unwrap().starts_with("init_fail:"));
        assert_eq!(snap.max_c(), None);
    }
}
