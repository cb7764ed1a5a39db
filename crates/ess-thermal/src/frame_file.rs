//! Frame-file sensor adapter.
//!
//! The I2C driver bridge keeps the latest full frame in a text file: one
//! temperature per pixel in row-major order, separated by whitespace or
//! commas. Bridges that dump the frame as a JSON array of numbers are read
//! with `serde_json` instead.

use std::fs;
use std::path::PathBuf;

use ess_core::roi::FrameGeometry;
use ess_core::{PipelineError, RefreshRate, SensorConnector, ThermalSensor};

/// Opens [`FrameFileSensor`]s on a fixed path.
#[derive(Debug, Clone)]
pub struct FrameFileConnector {
    path: PathBuf,
    geometry: FrameGeometry,
}

impl FrameFileConnector {
    /// Connector for frames of `geometry` at `path`.
    pub const fn new(path: PathBuf, geometry: FrameGeometry) -> Self {
        Self { path, geometry }
    }
}

impl SensorConnector for FrameFileConnector {
    type Sensor = FrameFileSensor;

    fn open(&mut self, rate: RefreshRate) -> Result<FrameFileSensor, PipelineError> {
        let meta = fs::metadata(&self.path).map_err(|e| PipelineError::Initialization {
            reason: format!("{}: {e}", self.path.display()),
        })?;
        if !meta.is_file() {
            return Err(PipelineError::Initialization {
                reason: format!("{} is not a file", self.path.display()),
            });
        }
        tracing::debug!(
            path = %self.path.display(),
            refresh_rate = %rate,
            control_bits = rate.control_bits(),
            "frame file opened"
        );
        Ok(FrameFileSensor {
            path: self.path.clone(),
            pixels: self.geometry.pixel_count(),
        })
    }
}

/// Reads one frame per capture from the bridge file.
#[derive(Debug)]
pub struct FrameFileSensor {
    path: PathBuf,
    pixels: usize,
}

impl ThermalSensor for FrameFileSensor {
    fn capture(&mut self, frame: &mut [f32]) -> Result<(), PipelineError> {
        let text = fs::read_to_string(&self.path).map_err(|e| PipelineError::Capture {
            reason: format!("{}: {e}", self.path.display()),
        })?;
        parse_frame(&text, self.pixels, frame)
    }
}

/// Parse exactly `pixels` temperatures from `text` into `frame`.
fn parse_frame(text: &str, pixels: usize, frame: &mut [f32]) -> Result<(), PipelineError> {
    if text.trim_start().starts_with('[') {
        return parse_json_frame(text, pixels, frame);
    }

    let mut count = 0usize;
    let values = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty());

    for token in values {
        let value: f32 = token.parse().map_err(|e| PipelineError::Capture {
            reason: format!("bad pixel value {token:?} at index {count}: {e}"),
        })?;
        let Some(slot) = frame.get_mut(count) else {
            return Err(PipelineError::Capture {
                reason: format!("frame has more than {pixels} pixels"),
            });
        };
        *slot = value;
        count = count.saturating_add(1);
    }

    if count == pixels {
        Ok(())
    } else {
        Err(PipelineError::Capture {
            reason: format!("frame has {count} pixels, expected {pixels}"),
        })
    }
}

fn parse_json_frame(text: &str, pixels: usize, frame: &mut [f32]) -> Result<(), PipelineError> {
    let values: Vec<f32> = serde_json::from_str(text).map_err(|e| PipelineError::Capture {
        reason: format!("bad JSON frame: {e}"),
    })?;
    if values.len() != pixels {
        return Err(PipelineError::Capture {
            reason: format!("frame has {} pixels, expected {pixels}", values.len()),
        });
    }
    let Some(slots) = frame.get_mut(..pixels) else {
        return Err(PipelineError::Capture {
            reason: format!("frame buffer holds fewer than {pixels} pixels"),
        });
    };
    slots.copy_from_slice(&values);
    Ok(())
}
