//! Region selection with switching hysteresis
//!
//! The selector only ever says *where* to be; it never says to run spot. A
//! region's availability is unconfirmed until the environment reports it
//! live on the next epoch, so the engine uses a recommendation to
//! pre-position, not to launch.
//!
//! ## Rules (epoch `t`)
//!
//! 1. Mid-restart: no recommendation (switching forfeits overhead already paid)
//! 2. Current region has spot: stay, unless another region's run is longer by
//!    more than the payback threshold (`restart_overhead` in epochs)
//! 3. Some region has spot: longest run wins, ties to the lowest id
//! 4. No region has spot: shortest wait wins, ties to the longest run on
//!    arrival, then the current region, then the lowest id
//!
//! Without a trusted trace, run lengths are unknown. With a live
//! multi-region query the selector still picks a region that has spot now;
//! otherwise it makes no recommendation.

use serde::{Deserialize, Serialize};
use skyhop_core::EpochGrid;

use crate::calibration::TraceView;

/// What a recommendation was based on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationBasis {
    /// Trace predictions for availability and run length
    Trace,
    /// Live availability now, trace run lengths
    Live,
    /// Live availability only (trace absent or untrusted)
    LiveOnly,
}

/// Where to be for the next epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub region: usize,
    /// Heuristic confidence in `[0, 1]`
    pub confidence: f64,
    pub basis: RecommendationBasis,
    /// Epochs until spot is expected in `region`
    pub wait_epochs: usize,
    /// Expected contiguous spot epochs once available
    pub run_length: usize,
}

/// Inputs for one selection
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub epoch: usize,
    pub num_regions: usize,
    pub current_region: usize,
    /// Live observation for the current region
    pub current_has_spot: bool,
    pub remaining_restart_overhead: f64,
    /// Trusted trace predictions, if any
    pub trace: Option<TraceView<'a>>,
    /// Live availability for all regions, if the environment supports it
    pub live: Option<&'a [bool]>,
}

impl SelectionContext<'_> {
    fn live_spot(&self, region: usize) -> Option<bool> {
        if region == self.current_region {
            return Some(self.current_has_spot);
        }
        self.live.and_then(|l| l.get(region).copied())
    }
}

/// Picks the region to use now or prepare to use next
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSelector {
    payback_epochs: usize,
}

impl RegionSelector {
    /// Payback threshold is `ceil(restart_overhead / gap) * payback_factor`
    pub fn new(grid: EpochGrid, restart_overhead: f64, payback_factor: f64) -> Self {
        let epochs = grid.epochs_for(restart_overhead) as f64 * payback_factor.max(0.0);
        Self {
            payback_epochs: epochs.ceil() as usize,
        }
    }

    pub fn payback_epochs(&self) -> usize {
        self.payback_epochs
    }

    pub fn recommend(&self, ctx: &SelectionContext<'_>) -> Option<Recommendation> {
        if ctx.remaining_restart_overhead > 0.0 || ctx.num_regions == 0 {
            return None;
        }
        match ctx.trace {
            Some(view) => self.recommend_with_trace(ctx, view),
            None => self.recommend_live_only(ctx),
        }
    }

    fn confidence(&self, run_length: usize, wait_epochs: usize) -> f64 {
        let run = run_length as f64;
        run / (run + self.payback_epochs as f64 + 1.0) / (1.0 + wait_epochs as f64)
    }

    fn recommend_live_only(&self, ctx: &SelectionContext<'_>) -> Option<Recommendation> {
        // Without live data for other regions we stay put
        ctx.live?;
        let region = if ctx.current_has_spot {
            ctx.current_region
        } else {
            (0..ctx.num_regions).find(|r| ctx.live_spot(*r) == Some(true))?
        };
        Some(Recommendation {
            region,
            confidence: 0.5,
            basis: RecommendationBasis::LiveOnly,
            wait_epochs: 0,
            run_length: 1,
        })
    }

    fn recommend_with_trace(
        &self,
        ctx: &SelectionContext<'_>,
        view: TraceView<'_>,
    ) -> Option<Recommendation> {
        let t = ctx.epoch;
        let spot_now = |r: usize| {
            ctx.live_spot(r)
                .map(|live| (live, RecommendationBasis::Live))
                .unwrap_or((view.available(r, t), RecommendationBasis::Trace))
        };
        // A live sighting counts as at least one epoch of run
        let run_now = |r: usize| match spot_now(r) {
            (true, _) => view.run_length(r, t).max(1),
            (false, _) => 0,
        };

        let best_now = (0..ctx.num_regions)
            .filter(|r| spot_now(*r).0)
            .map(|r| (r, run_now(r)))
            // Longest run; `max_by_key` keeps the last maximum, so compare
            // on reversed id to land on the lowest one
            .max_by_key(|(r, run)| (*run, std::cmp::Reverse(*r)));

        if ctx.current_has_spot {
            let current_run = run_now(ctx.current_region);
            let alternative = (0..ctx.num_regions)
                .filter(|r| *r != ctx.current_region && spot_now(*r).0)
                .map(|r| (r, run_now(r)))
                .max_by_key(|(r, run)| (*run, std::cmp::Reverse(*r)));

            let (region, run) = match alternative {
                Some((r, run)) if run > current_run + self.payback_epochs => (r, run),
                _ => (ctx.current_region, current_run),
            };
            return Some(Recommendation {
                region,
                confidence: self.confidence(run, 0),
                basis: spot_now(region).1,
                wait_epochs: 0,
                run_length: run,
            });
        }

        if let Some((region, run)) = best_now {
            return Some(Recommendation {
                region,
                confidence: self.confidence(run, 0),
                basis: spot_now(region).1,
                wait_epochs: 0,
                run_length: run,
            });
        }

        // Nobody has spot now: head for the earliest predicted opening
        let (region, wait, run) = (0..ctx.num_regions)
            .filter_map(|r| {
                let wait = view.wait(r, t + 1)? + 1;
                Some((r, wait, view.run_length(r, t + wait)))
            })
            .min_by_key(|(r, wait, run)| {
                (
                    *wait,
                    std::cmp::Reverse(*run),
                    *r != ctx.current_region,
                    *r,
                )
            })?;

        Some(Recommendation {
            region,
            confidence: self.confidence(run, wait),
            basis: RecommendationBasis::Trace,
            wait_epochs: wait,
            run_length: run,
        })
    }
}
