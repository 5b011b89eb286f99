//! Monotonic accumulation of completed work
//!
//! The environment exposes an append-only list of completed-work segments.
//! The tracker consumes only the segments it has not seen yet, so each
//! epoch costs `O(new segments)`. Negative or non-finite segments and a list
//! that shrinks are ignored rather than applied.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Accumulated work for one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressTracker {
    work_done: f64,
    segments_seen: usize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds of work completed so far
    pub fn work_done(&self) -> f64 {
        self.work_done
    }

    /// Work still required to reach `duration` (never negative)
    pub fn remaining(&self, duration: f64) -> f64 {
        (duration - self.work_done).max(0.0)
    }

    pub fn is_complete(&self, duration: f64) -> bool {
        self.work_done >= duration
    }

    /// Pull new segments from the environment; returns the work added
    pub fn sync(&mut self, segments: &[f64]) -> f64 {
        if segments.len() < self.segments_seen {
            warn!(
                seen = self.segments_seen,
                reported = segments.len(),
                "Completed-work list shrank, ignoring"
            );
            return 0.0;
        }

        let added: f64 = segments[self.segments_seen..]
            .iter()
            .filter(|s| s.is_finite() && **s > 0.0)
            .sum();
        self.segments_seen = segments.len();
        self.work_done += added;
        added
    }
}
