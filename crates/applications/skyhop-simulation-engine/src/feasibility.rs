//! One-way commitment to on-demand execution
//!
//! ```text
//! NORMAL ──(remaining_time <= remaining_work + overhead + margin)──▶ COMMITTED
//! ```
//!
//! There is no transition back. Once committed, the engine runs on-demand
//! every epoch until the work is done.

use serde::{Deserialize, Serialize};
use skyhop_core::ClusterType;
use tracing::info;

/// Guard state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardState {
    Normal,
    Committed,
}

/// Inputs to one feasibility evaluation (seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeasibilityInput {
    pub elapsed: f64,
    pub remaining_time: f64,
    pub remaining_work: f64,
    pub last_cluster_type: ClusterType,
    pub remaining_restart_overhead: f64,
    pub restart_overhead: f64,
}

impl FeasibilityInput {
    /// Overhead still to pay if we run on-demand from now on
    pub fn on_demand_overhead(&self) -> f64 {
        if self.last_cluster_type == ClusterType::OnDemand {
            self.remaining_restart_overhead.max(0.0)
        } else {
            self.restart_overhead
        }
    }
}

/// The commit latch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityGuard {
    safety_margin: f64,
    state: GuardState,
    committed_at: Option<f64>,
}

impl FeasibilityGuard {
    pub fn new(safety_margin: f64) -> Self {
        Self {
            safety_margin,
            state: GuardState::Normal,
            committed_at: None,
        }
    }

    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.state == GuardState::Committed
    }

    /// Elapsed time at which the guard latched
    pub fn committed_at(&self) -> Option<f64> {
        self.committed_at
    }

    /// Whether on-demand from now would still finish with margin to spare
    pub fn has_slack(&self, input: &FeasibilityInput) -> bool {
        input.remaining_time
            > input.remaining_work + input.on_demand_overhead() + self.safety_margin
    }

    /// Evaluate and latch if this is the last safe moment
    pub fn evaluate(&mut self, input: &FeasibilityInput) -> GuardState {
        if self.state == GuardState::Normal && !self.has_slack(input) {
            info!(
                elapsed = input.elapsed,
                remaining_time = input.remaining_time,
                remaining_work = input.remaining_work,
                overhead = input.on_demand_overhead(),
                margin = self.safety_margin,
                "Committing to on-demand for the rest of the task"
            );
            self.commit(input.elapsed);
        }
        self.state
    }

    /// Latch unconditionally
    pub fn commit(&mut self, elapsed: f64) {
        if self.state == GuardState::Normal {
            self.state = GuardState::Committed;
            self.committed_at = Some(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(remaining_time: f64, last: ClusterType, remaining_overhead: f64) -> FeasibilityInput {
        FeasibilityInput {
            elapsed: 7200.0 - remaining_time,
            remaining_time,
            remaining_work: 3600.0,
            last_cluster_type: last,
            remaining_restart_overhead: remaining_overhead,
            restart_overhead: 300.0,
        }
    }

    #[test]
    fn test_stays_normal_with_slack() {
        let mut guard = FeasibilityGuard::new(120.0);
        assert_eq!(guard.evaluate(&input(5000.0, ClusterType::None, 0.0)), GuardState::Normal);
        assert!(guard.committed_at().is_none());
    }

    #[test]
    fn test_commits_at_threshold() {
        let mut guard = FeasibilityGuard::new(120.0);
        assert_eq!(guard.evaluate(&input(4021.0, ClusterType::Spot, 0.0)), GuardState::Normal);
        assert_eq!(guard.evaluate(&input(4020.0, ClusterType::Spot, 0.0)), GuardState::Committed);
        assert_eq!(guard.committed_at(), Some(3180.0));
    }

    #[test]
    fn test_on_demand_uses_remaining_overhead() {
        let mut guard = FeasibilityGuard::new(120.0);
        // Full overhead would commit, but on-demand has only 60s left to pay
        let state = guard.evaluate(&input(3900.0, ClusterType::OnDemand, 60.0));
        assert_eq!(state, GuardState::Normal);
        let state = guard.evaluate(&input(3900.0, ClusterType::Spot, 60.0));
        assert_eq!(state, GuardState::Committed);
    }

    #[test]
    fn test_commit_is_one_way() {
        let mut guard = FeasibilityGuard::new(120.0);
        guard.evaluate(&input(100.0, ClusterType::None, 0.0));
        assert!(guard.is_committed());
        // Plenty of slack again (e.g. progress reported late): still committed
        assert_eq!(guard.evaluate(&input(1e9, ClusterType::None, 0.0)), GuardState::Committed);
        assert_eq!(guard.committed_at(), Some(7100.0));
    }
}
