//! Online calibration of trace predictions against live observations
//!
//! The environment only reveals spot availability for the active region, so
//! each epoch yields one `(epoch, region, observed_has_spot)` sample. The
//! calibrator keeps a bounded window of these and compares each one with the
//! trace at `epoch + offset`.
//!
//! - **Drift**: once enough samples exist and the mismatch rate exceeds the
//!   threshold, trust is revoked for good. Every consumer then falls back to
//!   locally observed availability only.
//! - **Phase shift**: an optional search over small integer offsets adopts
//!   whichever shift best explains the window, for traces recorded against a
//!   different clock origin.
//! - **Inversion**: a window that is mostly wrong on the live clock (offset 0)
//!   revokes trust before any shift is considered.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::availability::AvailabilityIndex;
use crate::config::CalibrationConfig;

/// Snapshot of calibration bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub mismatch_count: usize,
    pub sample_count: usize,
    pub trust: bool,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    epoch: usize,
    region: usize,
    observed: bool,
}

/// Trace predictions as seen through the calibrated offset.
///
/// All epochs passed in and returned are live epochs.
#[derive(Debug, Clone, Copy)]
pub struct TraceView<'a> {
    index: &'a AvailabilityIndex,
    offset: i64,
}

impl<'a> TraceView<'a> {
    pub fn new(index: &'a AvailabilityIndex, offset: i64) -> Self {
        Self { index, offset }
    }

    fn shifted(&self, epoch: usize) -> Option<usize> {
        usize::try_from(epoch as i64 + self.offset).ok()
    }

    pub fn num_regions(&self) -> usize {
        self.index.num_regions()
    }

    pub fn available(&self, region: usize, epoch: usize) -> bool {
        self.shifted(epoch)
            .is_some_and(|t| self.index.available(region, t))
    }

    pub fn run_length(&self, region: usize, epoch: usize) -> usize {
        self.shifted(epoch)
            .map_or(0, |t| self.index.run_length(region, t))
    }

    /// Epochs until the region is next available (0 = now), if ever
    pub fn wait(&self, region: usize, epoch: usize) -> Option<usize> {
        let t = self.shifted(epoch).unwrap_or(0);
        let next = self.index.next_available(region, t);
        (next < self.index.horizon()).then(|| next - t)
    }

    /// Upper bound on spot epochs left anywhere from `epoch`
    pub fn future_any_spot(&self, epoch: usize) -> usize {
        self.shifted(epoch)
            .map_or(0, |t| self.index.future_any_spot(t))
    }
}

/// Reconciles predicted and observed availability
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    index: Option<Arc<AvailabilityIndex>>,
    window: VecDeque<Sample>,
    mismatch_count: usize,
    trust: bool,
    offset: i64,
    revoked_at: Option<usize>,
}

impl Calibrator {
    /// Without trace data the calibrator starts (and stays) untrusted
    pub fn new(config: CalibrationConfig, index: Option<Arc<AvailabilityIndex>>) -> Self {
        let trust = index.is_some();
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            index,
            mismatch_count: 0,
            trust,
            offset: 0,
            revoked_at: None,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.trust
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Epoch at which trust was revoked
    pub fn revoked_at(&self) -> Option<usize> {
        self.revoked_at
    }

    pub fn state(&self) -> CalibrationState {
        CalibrationState {
            mismatch_count: self.mismatch_count,
            sample_count: self.window.len(),
            trust: self.trust,
            offset: self.offset,
        }
    }

    /// Current mismatch rate over the window
    pub fn mismatch_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.mismatch_count as f64 / self.window.len() as f64
        }
    }

    /// Trace predictions, only while trusted
    pub fn view(&self) -> Option<TraceView<'_>> {
        match &self.index {
            Some(index) if self.trust => Some(TraceView::new(index, self.offset)),
            _ => None,
        }
    }

    /// Record a live observation of the active region
    pub fn observe(&mut self, epoch: usize, region: usize, observed: bool) {
        if !self.trust || self.index.is_none() {
            return;
        }

        self.window.push_back(Sample {
            epoch,
            region,
            observed,
        });
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }

        let enough = self.window.len() >= self.config.min_samples;

        // Mostly wrong on the live clock reads as an inverted trace. Any shift
        // that happens to line up with the negation must not rescue it.
        let live_clock_rate = self.mismatches_at(0) as f64 / self.window.len() as f64;
        let inverted = enough && live_clock_rate >= 1.0 - self.config.mismatch_threshold;

        if enough && !inverted && self.config.max_offset_epochs > 0 {
            self.search_offset();
        }
        self.mismatch_count = self.mismatches_at(self.offset);

        let rate = self.mismatch_rate();
        if inverted || (enough && rate > self.config.mismatch_threshold) {
            self.trust = false;
            self.revoked_at = Some(epoch);
            info!(
                epoch,
                region,
                mismatch_rate = rate,
                live_clock_rate,
                samples = self.window.len(),
                offset = self.offset,
                "Trace disagrees with live availability, no longer trusting it"
            );
        }
    }

    fn predicted(&self, sample: &Sample, offset: i64) -> bool {
        let Some(index) = &self.index else {
            return false;
        };
        usize::try_from(sample.epoch as i64 + offset)
            .is_ok_and(|t| index.available(sample.region, t))
    }

    fn mismatches_at(&self, offset: i64) -> usize {
        self.window
            .iter()
            .filter(|s| self.predicted(s, offset) != s.observed)
            .count()
    }

    fn search_offset(&mut self) {
        let k = self.config.max_offset_epochs as i64;
        let current = self.mismatches_at(self.offset);

        // Fewest mismatches; prefer small shifts on ties
        let (best_offset, best) = (-k..=k)
            .map(|offset| (offset, self.mismatches_at(offset)))
            .min_by_key(|(offset, mismatches)| (*mismatches, offset.abs(), *offset))
            .unwrap_or((self.offset, current));

        if best < current {
            debug!(
                from = self.offset,
                to = best_offset,
                mismatches = best,
                "Adopting trace offset"
            );
            self.offset = best_offset;
        }
    }
}
