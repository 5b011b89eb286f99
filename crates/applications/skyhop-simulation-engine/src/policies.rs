//! Scheduling policies driven once per epoch
//!
//! Implements the policies the simulator compares:
//! - Deadline-aware: the [`DecisionEngine`] (spot when safe, commits to
//!   on-demand at the last safe moment, pre-positions across regions)
//! - Greedy spot: spot whenever present, on-demand otherwise, no deadline
//!   reasoning
//! - On-demand only: the cost baseline

use skyhop_core::{ClusterType, Environment};

use crate::engine::DecisionEngine;

/// Scheduling policy trait
pub trait SchedulingPolicy {
    /// Decide this epoch's cluster type; may switch the environment's region
    fn step(
        &mut self,
        env: &mut dyn Environment,
        last_cluster_type: ClusterType,
        has_spot: bool,
    ) -> ClusterType;

    /// Get policy name
    fn name(&self) -> &str;

    /// Elapsed time at which the policy committed to on-demand, if it does
    fn committed_at(&self) -> Option<f64> {
        None
    }
}

impl SchedulingPolicy for DecisionEngine {
    fn step(
        &mut self,
        env: &mut dyn Environment,
        last_cluster_type: ClusterType,
        has_spot: bool,
    ) -> ClusterType {
        DecisionEngine::step(self, env, last_cluster_type, has_spot)
    }

    fn name(&self) -> &str {
        "DeadlineAware"
    }

    fn committed_at(&self) -> Option<f64> {
        DecisionEngine::committed_at(self)
    }
}

/// Greedy policy: spot whenever the current region has it, on-demand otherwise
#[derive(Debug, Default)]
pub struct GreedySpotPolicy {
    pub spot_epochs: usize,
    pub on_demand_epochs: usize,
}

impl GreedySpotPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulingPolicy for GreedySpotPolicy {
    fn step(
        &mut self,
        _env: &mut dyn Environment,
        _last_cluster_type: ClusterType,
        has_spot: bool,
    ) -> ClusterType {
        if has_spot {
            self.spot_epochs += 1;
            ClusterType::Spot
        } else {
            self.on_demand_epochs += 1;
            ClusterType::OnDemand
        }
    }

    fn name(&self) -> &str {
        "GreedySpot"
    }
}

/// Baseline policy: Only use on-demand instances (no spot)
#[derive(Debug)]
pub struct OnDemandOnlyPolicy {
    duration: f64,
}

impl OnDemandOnlyPolicy {
    /// `duration` lets the policy stop once the work is done
    pub fn new(duration: f64) -> Self {
        Self { duration }
    }
}

impl SchedulingPolicy for OnDemandOnlyPolicy {
    fn step(
        &mut self,
        env: &mut dyn Environment,
        _last_cluster_type: ClusterType,
        _has_spot: bool,
    ) -> ClusterType {
        let done: f64 = env.task_done_time().iter().filter(|s| **s > 0.0).sum();
        if done >= self.duration {
            ClusterType::None
        } else {
            ClusterType::OnDemand
        }
    }

    fn name(&self) -> &str {
        "OnDemandOnly"
    }

    fn committed_at(&self) -> Option<f64> {
        Some(0.0)
    }
}
