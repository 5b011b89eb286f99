//! Precomputed availability summaries with O(1) queries
//!
//! Built once from the normalized per-region arrays, then shared read-only
//! (typically behind an `Arc`) by every engine that uses the same traces.
//! Build cost is `O(regions * horizon)`.

use serde::{Deserialize, Serialize};
use skyhop_core::EpochGrid;

use crate::trace::{IngestReport, TraceIngestor, TraceSpec};

/// One region's normalized trace and its derived summaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionTrace {
    pub id: usize,
    /// `availability[t]`: spot predicted available at epoch `t`
    pub availability: Vec<bool>,
    /// Contiguous available epochs starting at `t` (0 if unavailable)
    pub run_length: Vec<u32>,
    /// Smallest `t' >= t` with availability, or the horizon if none remains
    pub next_available: Vec<u32>,
}

impl RegionTrace {
    fn build(id: usize, mut availability: Vec<bool>, horizon: usize) -> Self {
        availability.resize(horizon, false);

        let mut run_length = vec![0u32; horizon];
        let mut next_available = vec![horizon as u32; horizon];
        let mut run = 0u32;
        let mut next = horizon as u32;
        for t in (0..horizon).rev() {
            if availability[t] {
                run += 1;
                next = t as u32;
            } else {
                run = 0;
            }
            run_length[t] = run;
            next_available[t] = next;
        }

        Self {
            id,
            availability,
            run_length,
            next_available,
        }
    }
}

/// Per-region and cross-region availability index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityIndex {
    horizon: usize,
    regions: Vec<RegionTrace>,
    /// `any_spot[t]`: some region is available at `t`
    any_spot: Vec<bool>,
    /// Count of `any_spot` epochs in `[t, horizon)`
    future_any_spot: Vec<u32>,
}

impl AvailabilityIndex {
    /// Build from one array per region; arrays are padded or truncated to
    /// `horizon`
    pub fn build(regions: Vec<Vec<bool>>, horizon: usize) -> Self {
        let regions: Vec<RegionTrace> = regions
            .into_iter()
            .enumerate()
            .map(|(id, availability)| RegionTrace::build(id, availability, horizon))
            .collect();

        let any_spot: Vec<bool> = (0..horizon)
            .map(|t| regions.iter().any(|r| r.availability[t]))
            .collect();

        let mut future_any_spot = vec![0u32; horizon];
        let mut count = 0u32;
        for t in (0..horizon).rev() {
            count += u32::from(any_spot[t]);
            future_any_spot[t] = count;
        }

        Self {
            horizon,
            regions,
            any_spot,
            future_any_spot,
        }
    }

    /// Ingest one trace per region and build the index. Unusable traces
    /// become never-available regions; see the returned reports.
    pub fn from_traces(
        specs: &[TraceSpec],
        grid: EpochGrid,
        horizon: usize,
    ) -> (Self, Vec<IngestReport>) {
        let (regions, reports) = TraceIngestor::new(grid, horizon).ingest_all(specs);
        (Self::build(regions, horizon), reports)
    }

    /// Index with `num_regions` regions and no predicted availability
    pub fn empty(num_regions: usize, horizon: usize) -> Self {
        Self::build(vec![Vec::new(); num_regions], horizon)
    }

    /// Number of epochs covered (`H`)
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn region(&self, region: usize) -> Option<&RegionTrace> {
        self.regions.get(region)
    }

    pub fn available(&self, region: usize, t: usize) -> bool {
        self.regions
            .get(region)
            .and_then(|r| r.availability.get(t))
            .copied()
            .unwrap_or(false)
    }

    pub fn run_length(&self, region: usize, t: usize) -> usize {
        self.regions
            .get(region)
            .and_then(|r| r.run_length.get(t))
            .map_or(0, |v| *v as usize)
    }

    /// Next available epoch at or after `t`; the horizon when none remains
    pub fn next_available(&self, region: usize, t: usize) -> usize {
        self.regions
            .get(region)
            .and_then(|r| r.next_available.get(t))
            .map_or(self.horizon, |v| *v as usize)
    }

    pub fn any_spot(&self, t: usize) -> bool {
        self.any_spot.get(t).copied().unwrap_or(false)
    }

    /// Epochs in `[t, H)` where some region has spot
    pub fn future_any_spot(&self, t: usize) -> usize {
        self.future_any_spot.get(t).map_or(0, |v| *v as usize)
    }

    /// Upper bound on spot seconds still obtainable from `t`. Never a
    /// guarantee: switching regions and preemptions eat into it.
    pub fn spot_upper_bound_seconds(&self, t: usize, gap_seconds: f64) -> f64 {
        self.future_any_spot(t) as f64 * gap_seconds
    }
}
