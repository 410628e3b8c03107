//! Worker parameters accepted with an upload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pass-through parameters forwarded to the worker.
///
/// Values are validated minimally: numeric fields that are zero or do not
/// parse are dropped so the worker falls back to its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobParameters {
    /// A calibration file accompanied the upload
    #[serde(default)]
    pub calibration: bool,

    /// Model selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Frame rate override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Frame cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<u64>,

    /// Comma-separated class filter, verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<String>,
}

impl JobParameters {
    /// Set the model selector from a raw form value.
    pub fn with_model(mut self, raw: &str) -> Self {
        self.model = non_empty(raw);
        self
    }

    /// Set the fps from a raw form value.
    pub fn with_fps(mut self, raw: &str) -> Self {
        self.fps = parse_fps(raw);
        self
    }

    /// Set the frame cap from a raw form value.
    pub fn with_max_frames(mut self, raw: &str) -> Self {
        self.max_frames = parse_max_frames(raw);
        self
    }

    /// Set the class filter from a raw form value.
    pub fn with_classes(mut self, raw: &str) -> Self {
        self.classes = non_empty(raw);
        self
    }
}

/// Parse a frame rate. Zero, negative, non-finite and garbage mean "default".
pub fn parse_fps(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|fps| fps.is_finite() && *fps > 0.0)
}

/// Parse a frame cap. Zero and garbage mean "default".
///
/// Fractional values are truncated, matching how the form sends numbers.
pub fn parse_max_frames(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n).filter(|n| *n > 0);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| n.trunc() as u64)
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
