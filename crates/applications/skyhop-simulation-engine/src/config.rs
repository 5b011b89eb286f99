//! Decision engine configuration
//!
//! All knobs have defaults; a JSON file may override any subset of them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use skyhop_core::Result;
use tracing::warn;

/// Trace calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Observations kept in the sliding window
    pub window_size: usize,

    /// Observations required before trust can be revoked
    pub min_samples: usize,

    /// Mismatch rate above which the trace is no longer trusted
    pub mismatch_threshold: f64,

    /// Largest phase shift (epochs) tried by the offset search; 0 disables it
    pub max_offset_epochs: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            window_size: 32,
            min_samples: 8,
            mismatch_threshold: 0.35,
            max_offset_epochs: 3,
        }
    }
}

/// Configuration for the decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Safety margin in epochs of `gap_seconds`
    pub safety_margin_gaps: f64,

    /// Additional fixed safety margin (seconds)
    pub safety_margin_seconds: f64,

    /// Epochs added past the deadline when sizing trace arrays
    pub horizon_margin_epochs: usize,

    /// Multiplier on the restart-overhead payback threshold for switching
    /// away from a region that currently has spot
    pub switch_payback_factor: f64,

    /// Allow pre-positioning in other regions
    pub region_switching: bool,

    pub calibration: CalibrationConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            safety_margin_gaps: 2.0,
            safety_margin_seconds: 0.0,
            horizon_margin_epochs: 4,
            switch_payback_factor: 1.0,
            region_switching: true,
            calibration: CalibrationConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// Load from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config.validated())
    }

    /// Replace nonsensical values with defaults
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if !self.safety_margin_gaps.is_finite() || self.safety_margin_gaps < 0.0 {
            warn!(value = self.safety_margin_gaps, "Invalid safety_margin_gaps, using default");
            self.safety_margin_gaps = defaults.safety_margin_gaps;
        }
        if !self.safety_margin_seconds.is_finite() || self.safety_margin_seconds < 0.0 {
            warn!(
                value = self.safety_margin_seconds,
                "Invalid safety_margin_seconds, using default"
            );
            self.safety_margin_seconds = defaults.safety_margin_seconds;
        }
        if !self.switch_payback_factor.is_finite() || self.switch_payback_factor < 0.0 {
            warn!(
                value = self.switch_payback_factor,
                "Invalid switch_payback_factor, using default"
            );
            self.switch_payback_factor = defaults.switch_payback_factor;
        }

        let cal = &mut self.calibration;
        cal.window_size = cal.window_size.max(1);
        cal.min_samples = cal.min_samples.clamp(1, cal.window_size);
        if !(0.0..=1.0).contains(&cal.mismatch_threshold) {
            warn!(value = cal.mismatch_threshold, "Invalid mismatch_threshold, using default");
            cal.mismatch_threshold = defaults.calibration.mismatch_threshold;
        }
        self
    }

    /// Safety margin in seconds for an epoch of `gap_seconds`.
    ///
    /// Never less than one epoch: a spot epoch may make no progress at all.
    pub fn safety_margin(&self, gap_seconds: f64) -> f64 {
        (self.safety_margin_gaps * gap_seconds + self.safety_margin_seconds).max(gap_seconds)
    }

    /// Set the margin in epochs
    pub fn with_safety_margin_gaps(mut self, gaps: f64) -> Self {
        self.safety_margin_gaps = gaps;
        self
    }

    /// Set the additional fixed margin
    pub fn with_safety_margin_seconds(mut self, seconds: f64) -> Self {
        self.safety_margin_seconds = seconds;
        self
    }

    /// Enable or disable region pre-positioning
    pub fn with_region_switching(mut self, enabled: bool) -> Self {
        self.region_switching = enabled;
        self
    }

    /// Set calibration settings
    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }
}
