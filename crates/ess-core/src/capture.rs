//! Capture and ROI aggregation.
//!
//! [`CaptureAggregator`] owns the sensor handle and turns each tick into a
//! [`Snapshot`]. It never sleeps itself: every [`CaptureAggregator::tick`]
//! returns the delay the caller should wait before the next one, so the
//! retry and backoff schedule is testable without a clock.
//!
//! Sensor access is behind two traits. A [`SensorConnector`] opens a sensor,
//! and the opened [`ThermalSensor`] fills full frames. A failed capture drops
//! the handle so the next tick re-opens it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use ess_types::{Roi, Snapshot};

use crate::config::ThermalConfig;
use crate::error::{FaultKind, PipelineError};
use crate::roi::{FrameGeometry, center_roi, roi_min_max};

/// Sensor-internal refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefreshRate {
    /// 0.5 Hz.
    HalfHz,
    /// 1 Hz.
    Hz1,
    /// 2 Hz.
    Hz2,
    /// 4 Hz.
    Hz4,
    /// 8 Hz.
    Hz8,
    /// 16 Hz.
    Hz16,
    /// 32 Hz.
    Hz32,
    /// 64 Hz.
    Hz64,
}

impl RefreshRate {
    /// Rate used when the configured string is not recognized.
    pub const FALLBACK: Self = Self::Hz2;

    const ALL: [Self; 8] = [
        Self::HalfHz,
        Self::Hz1,
        Self::Hz2,
        Self::Hz4,
        Self::Hz8,
        Self::Hz16,
        Self::Hz32,
        Self::Hz64,
    ];

    /// Parse a rate label such as `4HZ` (case-insensitive, surrounding
    /// whitespace ignored).
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|rate| rate.as_str().eq_ignore_ascii_case(wanted))
    }

    /// Parse a configured rate, falling back to [`Self::FALLBACK`] with a
    /// warning.
    pub fn from_config(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            tracing::warn!(
                refresh_rate = raw,
                fallback = Self::FALLBACK.as_str(),
                "unknown sensor refresh rate"
            );
            Self::FALLBACK
        })
    }

    /// Canonical label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HalfHz => "0.5HZ",
            Self::Hz1 => "1HZ",
            Self::Hz2 => "2HZ",
            Self::Hz4 => "4HZ",
            Self::Hz8 => "8HZ",
            Self::Hz16 => "16HZ",
            Self::Hz32 => "32HZ",
            Self::Hz64 => "64HZ",
        }
    }

    /// Value of the sensor's refresh-rate control bits.
    pub const fn control_bits(self) -> u8 {
        match self {
            Self::HalfHz => 0b000,
            Self::Hz1 => 0b001,
            Self::Hz2 => 0b010,
            Self::Hz4 => 0b011,
            Self::Hz8 => 0b100,
            Self::Hz16 => 0b101,
            Self::Hz32 => 0b110,
            Self::Hz64 => 0b111,
        }
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opened thermal sensor.
pub trait ThermalSensor: Send {
    /// Fill `frame` with one full row-major frame in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Capture`] on any sensor fault.
    fn capture(&mut self, frame: &mut [f32]) -> Result<(), PipelineError>;
}

/// Opens sensors. Implemented by the hardware or bridge adapter.
pub trait SensorConnector: Send {
    /// Sensor handle produced by [`Self::open`].
    type Sensor: ThermalSensor;

    /// Open and configure the sensor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Initialization`] if the sensor cannot be
    /// reached or configured.
    fn open(&mut self, rate: RefreshRate) -> Result<Self::Sensor, PipelineError>;
}

/// Capture settings resolved from config.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Sensor frame size.
    pub geometry: FrameGeometry,
    /// Clamped ROI, fixed for the life of the aggregator.
    pub roi: Roi,
    /// I2C bus number copied into snapshots.
    pub i2c_bus: u32,
    /// Sensor refresh rate.
    pub refresh_rate: RefreshRate,
    /// Normal wait between ticks.
    pub tick_period: Duration,
    /// Wait after a failed open.
    pub init_retry: Duration,
    /// Extra wait after a failed capture.
    pub capture_fail_backoff: Duration,
}

impl CaptureSettings {
    /// Resolve settings for an MLX90640 from the thermal config section.
    pub fn from_config(config: &ThermalConfig) -> Self {
        let geometry = FrameGeometry::MLX90640;
        Self {
            geometry,
            roi: center_roi(geometry, config.roi_width, config.roi_height),
            i2c_bus: config.i2c_bus,
            refresh_rate: RefreshRate::from_config(&config.refresh_rate),
            tick_period: config.tick_period(),
            init_retry: config.init_retry(),
            capture_fail_backoff: config.capture_fail_backoff(),
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Snapshot to write.
    pub snapshot: Snapshot,
    /// Wait before the next tick.
    pub delay: Duration,
    /// Fault raised during the tick, if any.
    pub fault: Option<FaultKind>,
}

/// Owns the sensor handle and reduces frames to snapshots.
pub struct CaptureAggregator<C: SensorConnector> {
    connector: C,
    sensor: Option<C::Sensor>,
    settings: CaptureSettings,
    frame: Vec<f32>,
}

impl<C: SensorConnector> CaptureAggregator<C> {
    /// Create an aggregator. The sensor is opened on the first tick.
    pub fn new(connector: C, settings: CaptureSettings) -> Self {
        if settings.roi.is_empty() {
            tracing::warn!(
                x0 = settings.roi.x0,
                y0 = settings.roi.y0,
                w = settings.roi.w,
                h = settings.roi.h,
                "configured ROI is empty, every snapshot will carry empty_roi"
            );
        }
        let frame = vec![0.0; settings.geometry.pixel_count()];
        Self {
            connector,
            sensor: None,
            settings,
            frame,
        }
    }

    /// Resolved settings.
    pub const fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Whether a sensor handle is currently held.
    pub const fn has_sensor(&self) -> bool {
        self.sensor.is_some()
    }

    /// Drop the sensor handle, if any.
    pub fn release(&mut self) {
        if self.sensor.take().is_some() {
            tracing::info!("sensor released");
        }
    }

    /// Run one capture tick stamped with `now`.
    pub fn tick(&mut self, now: DateTime<FixedOffset>) -> TickOutcome {
        let mut sensor = match self.sensor.take() {
            Some(sensor) => sensor,
            None => match self.connector.open(self.settings.refresh_rate) {
                Ok(sensor) => {
                    tracing::info!(
                        i2c_bus = self.settings.i2c_bus,
                        refresh_rate = %self.settings.refresh_rate,
                        "sensor initialized"
                    );
                    sensor
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sensor initialization failed");
                    return self.failed(
                        now,
                        format!("init_fail: {}", fault_reason(&e)),
                        self.settings.init_retry,
                        e.kind(),
                    );
                }
            },
        };

        if let Err(e) = sensor.capture(&mut self.frame) {
            tracing::warn!(error = %e, "frame capture failed, releasing sensor");
            drop(sensor);
            return self.failed(
                now,
                format!("frame_fail: {}", fault_reason(&e)),
                self.settings
                    .capture_fail_backoff
                    .saturating_add(self.settings.tick_period),
                e.kind(),
            );
        }
        self.sensor = Some(sensor);

        let roi = self.settings.roi;
        let snapshot = match roi_min_max(&self.frame, self.settings.geometry, roi) {
            Some(hotspot) => {
                tracing::debug!(max_c = hotspot.max_c, "frame reduced");
                Snapshot::reading(now, roi, hotspot)
            }
            None => Snapshot::failed(
                now,
                roi,
                format!(
                    "empty_roi: no finite pixel in {}x{} at ({}, {})",
                    roi.w, roi.h, roi.x0, roi.y0
                ),
            ),
        };
        TickOutcome {
            snapshot: snapshot.with_i2c_bus(self.settings.i2c_bus),
            delay: self.settings.tick_period,
            fault: None,
        }
    }

    fn failed(
        &self,
        now: DateTime<FixedOffset>,
        error: String,
        delay: Duration,
        kind: FaultKind,
    ) -> TickOutcome {
        TickOutcome {
            snapshot: Snapshot::failed(now, self.settings.roi, error)
                .with_i2c_bus(self.settings.i2c_bus),
            delay,
            fault: Some(kind),
        }
    }
}

/// Driver-provided text without the taxonomy prefix.
fn fault_reason(err: &PipelineError) -> String {
    match err {
        PipelineError::Initialization { reason } | PipelineError::Capture { reason } => {
            reason.clone()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use ess_types::PixelPos;

    use super::*;

    /// Scripted sensor: each capture pops the next frame or fault.
    struct ScriptedSensor {
        script: Arc<Mutex<VecDeque<Result<f32, String>>>>,
    }

    impl ThermalSensor for ScriptedSensor {
        fn capture(&mut self, frame: &mut [f32]) -> Result<(), PipelineError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(hot)) => {
                    frame.fill(20.0);
                    // (14, 9) sits inside the default 7x20 ROI.
                    frame[9 * 32 + 14] = hot;
                    Ok(())
                }
                Some(Err(reason)) => Err(PipelineError::Capture { reason }),
                None => Err(PipelineError::Capture {
                    reason: "script exhausted".to_owned(),
                }),
            }
        }
    }

    struct ScriptedConnector {
        opens: VecDeque<Result<(), String>>,
        open_calls: usize,
        rates: Vec<RefreshRate>,
        frames: Arc<Mutex<VecDeque<Result<f32, String>>>>,
    }

    impl ScriptedConnector {
        fn new(opens: Vec<Result<(), String>>, frames: Vec<Result<f32, String>>) -> Self {
            Self {
                opens: opens.into(),
                open_calls: 0,
                rates: Vec::new(),
                frames: Arc::new(Mutex::new(frames.into())),
            }
        }
    }

    impl SensorConnector for ScriptedConnector {
        type Sensor = ScriptedSensor;

        fn open(&mut self, rate: RefreshRate) -> Result<ScriptedSensor, PipelineError> {
            self.open_calls += 1;
            self.rates.push(rate);
            match self.opens.pop_front().unwrap_or(Ok(())) {
                Ok(()) => Ok(ScriptedSensor {
                    script: Arc::clone(&self.frames),
                }),
                Err(reason) => Err(PipelineError::Initialization { reason }),
            }
        }
    }

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-03-02T10:15:00+09:00").unwrap()
    }

    fn settings() -> CaptureSettings {
        CaptureSettings::from_config(&ThermalConfig::default())
    }

    #[test]
    fn refresh_rate_parsing() {
        assert_eq!(RefreshRate::parse("4hz"), Some(RefreshRate::Hz4));
        assert_eq!(RefreshRate::parse(" 0.5HZ "), Some(RefreshRate::HalfHz));
        assert_eq!(RefreshRate::parse("3HZ"), None);
        assert_eq!(RefreshRate::from_config("fast"), RefreshRate::Hz2);
        assert_eq!(RefreshRate::Hz64.control_bits(), 7);
        assert_eq!(RefreshRate::HalfHz.control_bits(), 0);
    }

    #[test]
    fn settings_from_defaults() {
        let s = settings();
        assert_eq!(s.roi, Roi::new(12, 2, 7, 20));
        assert_eq!(s.i2c_bus, 9);
        assert_eq!(s.refresh_rate, RefreshRate::Hz2);
        assert_eq!(s.tick_period, Duration::from_secs(1));
        assert_eq!(s.init_retry, Duration::from_millis(500));
    }

    #[test]
    fn successful_tick_writes_reading() {
        let connector = ScriptedConnector::new(vec![], vec![Ok(41.5)]);
        let mut agg = CaptureAggregator::new(connector, settings());
        let out = agg.tick(now());
        assert_eq!(out.fault, None);
        assert_eq!(out.delay, Duration::from_secs(1));
        assert_eq!(out.snapshot.max_c(), Some(41.5));
        let hot = out.snapshot.hotspot().unwrap();
        assert_eq!(hot.min_c, Some(20.0));
        assert_eq!(hot.max_pos, Some(PixelPos::new(14, 9)));
        assert_eq!(hot.max_pos_roi, Some(PixelPos::new(2, 7)));
        assert_eq!(out.snapshot.i2c_bus, Some(9));
        assert!(agg.has_sensor());
    }

    #[test]
    fn init_failure_retries_quickly_and_reopens() {
        let connector = ScriptedConnector::new(
            vec![Err("no device on bus 9".to_owned()), Ok(())],
            vec![Ok(30.0)],
        );
        let mut agg = CaptureAggregator::new(connector, settings());

        let first = agg.tick(now());
        assert_eq!(first.fault, Some(FaultKind::Initialization));
        assert_eq!(first.delay, Duration::from_millis(500));
        assert_eq!(first.snapshot.error(), Some("init_fail: no device on bus 9"));
        assert_eq!(first.snapshot.max_c(), None);
        assert!(!agg.has_sensor());

        let second = agg.tick(now());
        assert_eq!(second.fault, None);
        assert_eq!(second.snapshot.max_c(), Some(30.0));
        assert_eq!(agg.connector.open_calls, 2);
        assert_eq!(agg.connector.rates, vec![RefreshRate::Hz2; 2]);
    }

    #[test]
    fn capture_failure_releases_sensor() {
        let connector = ScriptedConnector::new(
            vec![],
            vec![Ok(30.0), Err("i2c timeout".to_owned()), Ok(33.0)],
        );
        let mut agg = CaptureAggregator::new(connector, settings());

        assert_eq!(agg.tick(now()).snapshot.max_c(), Some(30.0));

        let failed = agg.tick(now());
        assert_eq!(failed.fault, Some(FaultKind::Capture));
        assert_eq!(failed.snapshot.error(), Some("frame_fail: i2c timeout"));
        assert_eq!(failed.delay, Duration::from_millis(1500));
        assert!(!agg.has_sensor());

        let recovered = agg.tick(now());
        assert_eq!(recovered.snapshot.max_c(), Some(33.0));
        assert_eq!(agg.connector.open_calls, 2);
    }

    #[test]
    fn empty_roi_keeps_sensor() {
        let mut cfg = ThermalConfig::default();
        cfg.roi_width = 0;
        let connector = ScriptedConnector::new(vec![], vec![Ok(30.0), Ok(31.0)]);
        let mut agg = CaptureAggregator::new(connector, CaptureSettings::from_config(&cfg));

        let out = agg.tick(now());
        assert_eq!(out.fault, None);
        assert!(out.snapshot.error().unwrap().starts_with("empty_roi:"));
        assert!(agg.has_sensor());
        let _ = agg.tick(now());
        assert_eq!(agg.connector.open_calls, 1);
    }

    #[test]
    fn release_drops_handle() {
        let connector = ScriptedConnector::new(vec![], vec![Ok(30.0)]);
        let mut agg = CaptureAggregator::new(connector, settings());
        let _ = agg.tick(now());
        assert!(agg.has_sensor());
        agg.release();
        assert!(!agg.has_sensor());
    }
}
