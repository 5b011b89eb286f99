//! Core traits for Skyhop
//!
//! The Environment trait defines the interface a scheduling policy drives.
//! Policies work through this interface ONLY - never concrete simulators or
//! execution harnesses.

use crate::types::{Capabilities, EpochGrid};

/// Handle to the execution environment that applies per-epoch decisions.
///
/// The environment owns the clock and the cluster; a policy reads it, returns
/// a decision, and may call [`Environment::switch_region`] as its only side
/// effect.
pub trait Environment {
    /// Epoch length in seconds
    fn gap_seconds(&self) -> f64;

    /// Seconds elapsed since task start
    fn elapsed_seconds(&self) -> f64;

    /// Number of candidate regions
    fn num_regions(&self) -> usize;

    /// Index of the region the next cluster will launch in
    fn current_region(&self) -> usize;

    /// Move the next launch to region `idx`
    fn switch_region(&mut self, idx: usize);

    /// Restart overhead still to be paid by the running cluster (seconds)
    fn remaining_restart_overhead(&self) -> f64;

    /// Append-only sequence of completed-work segments (seconds)
    fn task_done_time(&self) -> &[f64];

    /// Whether [`Environment::spot_availability`] is implemented
    fn supports_multi_region_query(&self) -> bool {
        false
    }

    /// Live spot availability for every region at the current epoch
    fn spot_availability(&self) -> Option<Vec<bool>> {
        None
    }
}

impl Capabilities {
    /// Probe an environment once; the result is fixed for the engine's lifetime
    pub fn probe(env: &dyn Environment, has_trace_data: bool) -> Self {
        Self {
            has_multi_region_query: env.supports_multi_region_query(),
            has_trace_data,
        }
    }
}

/// Epoch grid described by an environment
pub fn grid_of(env: &dyn Environment) -> crate::Result<EpochGrid> {
    EpochGrid::new(env.gap_seconds())
}
