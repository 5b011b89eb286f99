//! Per-epoch decision engine
//!
//! Composes progress tracking, the feasibility guard, trace calibration, and
//! region selection into one decision per epoch:
//!
//! ```text
//! (last_cluster_type, has_spot)
//!     │
//!     ├── 1. Pull completed work            → done?      NONE
//!     ├── 2. Deadline passed?               → failure,   ON_DEMAND
//!     ├── 3. Feasibility guard              → committed? ON_DEMAND
//!     ├── 4. Calibrate trace against live observation
//!     ├── 5. Mid-restart?                   → repeat previous type
//!     ├── 6. Spot here now?                 → SPOT
//!     ├── 7. Ask region selector where to be next
//!     └── 8. Idle only if still safe after one more epoch, else ON_DEMAND
//! ```
//!
//! [`DecisionEngine::plan`] computes the action and optional region switch
//! without touching the environment; [`DecisionEngine::step`] applies the
//! switch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skyhop_core::{
    Capabilities, ClusterType, EngineStatus, Environment, EpochGrid, Result, SkyhopError, Task,
};
use tracing::{debug, error, info, warn};

use crate::availability::AvailabilityIndex;
use crate::calibration::{CalibrationState, Calibrator};
use crate::config::PolicyConfig;
use crate::feasibility::{FeasibilityGuard, FeasibilityInput, GuardState};
use crate::progress::ProgressTracker;
use crate::region::{Recommendation, RegionSelector, SelectionContext};

/// Everything the engine reads from the environment for one epoch
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub elapsed: f64,
    pub num_regions: usize,
    pub current_region: usize,
    pub remaining_restart_overhead: f64,
    pub last_cluster_type: ClusterType,
    /// Live spot availability in the current region
    pub has_spot: bool,
    pub task_done_time: &'a [f64],
    /// Live availability for every region (multi-region query capability)
    pub live_spot: Option<Vec<bool>>,
}

impl<'a> Observation<'a> {
    /// Read one epoch's inputs; optional queries only when the capability
    /// was detected at construction
    pub fn capture(
        env: &'a dyn Environment,
        last_cluster_type: ClusterType,
        has_spot: bool,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            elapsed: env.elapsed_seconds(),
            num_regions: env.num_regions(),
            current_region: env.current_region(),
            remaining_restart_overhead: env.remaining_restart_overhead(),
            last_cluster_type,
            has_spot,
            task_done_time: env.task_done_time(),
            live_spot: if capabilities.has_multi_region_query {
                env.spot_availability()
            } else {
                None
            },
        }
    }
}

/// Why an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    Completed,
    DeadlineExceeded,
    Committed,
    /// Restart overhead still being paid; same type, same region
    MidRestartHold,
    LocalSpot,
    /// Spot is here but leaving on-demand is not yet safe
    StayOnDemand,
    /// Waiting is still safe after one more epoch
    Idle,
    /// Waiting one more epoch would not be safe
    NoSlack,
}

/// Result of [`DecisionEngine::plan`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub action: ClusterType,
    pub switch_to: Option<usize>,
    pub reason: DecisionReason,
}

impl Plan {
    fn new(action: ClusterType, reason: DecisionReason) -> Self {
        Self {
            action,
            switch_to: None,
            reason,
        }
    }
}

/// Mutable decision state owned by one engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionState {
    pub committed: bool,
    pub last_cluster_type: ClusterType,
    pub current_region: usize,
    pub pending_overhead_seconds: f64,
}

/// Deadline-aware spot/on-demand decision engine for one task
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    task: Task,
    grid: EpochGrid,
    config: PolicyConfig,
    capabilities: Capabilities,
    state: DecisionState,
    progress: ProgressTracker,
    guard: FeasibilityGuard,
    calibrator: Calibrator,
    selector: RegionSelector,
    status: EngineStatus,
    deadline_missed_at: Option<f64>,
    region_switches: usize,
    last_recommendation: Option<Recommendation>,
}

impl DecisionEngine {
    /// Create an engine; `index` is shared read-only with other engines
    /// built from the same traces
    pub fn new(
        task: Task,
        grid: EpochGrid,
        capabilities: Capabilities,
        config: PolicyConfig,
        index: Option<Arc<AvailabilityIndex>>,
    ) -> Self {
        let config = config.validated();
        let capabilities = Capabilities {
            has_trace_data: capabilities.has_trace_data && index.is_some(),
            ..capabilities
        };
        let mut guard = FeasibilityGuard::new(config.safety_margin(grid.gap_seconds));
        let selector =
            RegionSelector::new(grid, task.restart_overhead, config.switch_payback_factor);
        let calibrator = Calibrator::new(
            config.calibration.clone(),
            index.filter(|_| capabilities.has_trace_data),
        );

        let status = if !task.is_feasible_a_priori() {
            warn!(
                duration = task.duration,
                deadline = task.deadline,
                "Deadline shorter than task duration, running on-demand only"
            );
            guard.commit(0.0);
            EngineStatus::Infeasible
        } else {
            EngineStatus::Running
        };

        Self {
            task,
            grid,
            config,
            capabilities,
            state: DecisionState {
                committed: guard.is_committed(),
                last_cluster_type: ClusterType::None,
                current_region: 0,
                pending_overhead_seconds: 0.0,
            },
            progress: ProgressTracker::new(),
            guard,
            calibrator,
            selector,
            status,
            deadline_missed_at: None,
            region_switches: 0,
            last_recommendation: None,
        }
    }

    /// Create an engine for `env`, probing its optional capabilities once
    pub fn for_environment(
        env: &dyn Environment,
        task: Task,
        config: PolicyConfig,
        index: Option<Arc<AvailabilityIndex>>,
    ) -> Result<Self> {
        let grid = skyhop_core::grid_of(env)?;
        let capabilities = Capabilities::probe(env, index.is_some());
        if let Some(index) = &index {
            if index.num_regions() != env.num_regions() {
                warn!(
                    trace_regions = index.num_regions(),
                    env_regions = env.num_regions(),
                    "Trace region count differs from environment, untraced regions stay unavailable"
                );
            }
        }
        info!(
            duration = task.duration,
            deadline = task.deadline,
            restart_overhead = task.restart_overhead,
            gap = grid.gap_seconds,
            regions = env.num_regions(),
            multi_region_query = capabilities.has_multi_region_query,
            trace_data = capabilities.has_trace_data,
            "Decision engine ready"
        );
        let mut engine = Self::new(task, grid, capabilities, config, index);
        engine.state.current_region = env.current_region();
        Ok(engine)
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn decision_state(&self) -> DecisionState {
        self.state
    }

    pub fn work_done(&self) -> f64 {
        self.progress.work_done()
    }

    pub fn is_committed(&self) -> bool {
        self.guard.is_committed()
    }

    /// Elapsed time at which the engine committed to on-demand
    pub fn committed_at(&self) -> Option<f64> {
        self.guard.committed_at()
    }

    pub fn safety_margin(&self) -> f64 {
        self.guard.safety_margin()
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibrator.state()
    }

    /// Epoch at which the trace stopped being trusted
    pub fn trust_revoked_at(&self) -> Option<usize> {
        self.calibrator.revoked_at()
    }

    pub fn region_switches(&self) -> usize {
        self.region_switches
    }

    pub fn last_recommendation(&self) -> Option<Recommendation> {
        self.last_recommendation
    }

    /// Terminal failure, if the deadline passed with work remaining
    pub fn failure(&self) -> Option<SkyhopError> {
        self.deadline_missed_at
            .map(|elapsed| SkyhopError::DeadlineExceeded {
                remaining_work: self.progress.remaining(self.task.duration),
                elapsed,
            })
    }

    /// Upper bound on spot seconds the trusted trace still offers from
    /// `elapsed`, across all regions.
    ///
    /// Reported only: decisions never depend on it, since the guard alone
    /// decides when waiting for spot stops being safe.
    pub fn spot_outlook(&self, elapsed: f64) -> Option<f64> {
        let view = self.calibrator.view()?;
        let epoch = self.grid.epoch_of(elapsed);
        Some(view.future_any_spot(epoch) as f64 * self.grid.gap_seconds)
    }

    /// One epoch: decide, then apply any region switch to `env`
    pub fn step(
        &mut self,
        env: &mut dyn Environment,
        last_cluster_type: ClusterType,
        has_spot: bool,
    ) -> ClusterType {
        let plan = {
            let obs = Observation::capture(&*env, last_cluster_type, has_spot, self.capabilities);
            self.plan(&obs)
        };

        if let Some(region) = plan.switch_to {
            if region < env.num_regions() {
                info!(
                    from = self.state.current_region,
                    to = region,
                    elapsed = env.elapsed_seconds(),
                    "Switching region"
                );
                env.switch_region(region);
                self.state.current_region = region;
                self.region_switches += 1;
            } else {
                let err = SkyhopError::InvalidRegion {
                    index: region,
                    num_regions: env.num_regions(),
                };
                warn!(error = %err, "Ignoring region switch");
            }
        }
        plan.action
    }

    /// Decide this epoch's action without side effects on the environment
    pub fn plan(&mut self, obs: &Observation<'_>) -> Plan {
        self.state.last_cluster_type = obs.last_cluster_type;
        self.state.current_region = obs.current_region;
        self.state.pending_overhead_seconds = obs.remaining_restart_overhead.max(0.0);

        let plan = self.decide(obs);
        self.state.committed = self.guard.is_committed();

        debug!(
            elapsed = obs.elapsed,
            region = obs.current_region,
            has_spot = obs.has_spot,
            last = %obs.last_cluster_type,
            action = %plan.action,
            reason = ?plan.reason,
            switch_to = ?plan.switch_to,
            work_done = self.progress.work_done(),
            "Decision"
        );
        plan
    }

    fn decide(&mut self, obs: &Observation<'_>) -> Plan {
        let gap = self.grid.gap_seconds;

        self.progress.sync(obs.task_done_time);
        if self.progress.is_complete(self.task.duration) {
            if self.status != EngineStatus::Completed {
                info!(elapsed = obs.elapsed, "Task complete");
                self.status = EngineStatus::Completed;
            }
            return Plan::new(ClusterType::None, DecisionReason::Completed);
        }

        let remaining_time = self.task.deadline - obs.elapsed;
        let remaining_work = self.progress.remaining(self.task.duration);

        if remaining_time <= 0.0 {
            if self.deadline_missed_at.is_none() {
                error!(
                    elapsed = obs.elapsed,
                    remaining_work, "Deadline exceeded with work remaining"
                );
                self.deadline_missed_at = Some(obs.elapsed);
            }
            self.status = EngineStatus::DeadlineExceeded;
            self.guard.commit(obs.elapsed);
            return Plan::new(ClusterType::OnDemand, DecisionReason::DeadlineExceeded);
        }

        let input = FeasibilityInput {
            elapsed: obs.elapsed,
            remaining_time,
            remaining_work,
            last_cluster_type: obs.last_cluster_type,
            remaining_restart_overhead: obs.remaining_restart_overhead,
            restart_overhead: self.task.restart_overhead,
        };
        if self.guard.evaluate(&input) == GuardState::Committed {
            return Plan::new(ClusterType::OnDemand, DecisionReason::Committed);
        }

        let epoch = self.grid.epoch_of(obs.elapsed);
        self.calibrator
            .observe(epoch, obs.current_region, obs.has_spot);

        // Still paying restart overhead: keep the cluster we are paying for
        if obs.remaining_restart_overhead > 0.0 {
            match obs.last_cluster_type {
                ClusterType::OnDemand => {
                    return Plan::new(ClusterType::OnDemand, DecisionReason::MidRestartHold);
                }
                ClusterType::Spot if obs.has_spot => {
                    return Plan::new(ClusterType::Spot, DecisionReason::MidRestartHold);
                }
                _ => {}
            }
        }

        // Safe to spend one more epoch without progress, then pay a full restart
        let slack_after_epoch = remaining_time - gap
            >= remaining_work + self.task.restart_overhead + self.guard.safety_margin();

        if obs.has_spot {
            if obs.last_cluster_type != ClusterType::OnDemand || slack_after_epoch {
                return Plan::new(ClusterType::Spot, DecisionReason::LocalSpot);
            }
            return Plan::new(ClusterType::OnDemand, DecisionReason::StayOnDemand);
        }

        let recommendation = self.recommend(obs, epoch);
        self.last_recommendation = recommendation;

        if let Some(outlook) = self.spot_outlook(obs.elapsed) {
            if outlook < remaining_work {
                debug!(
                    outlook,
                    remaining_work, "Trace offers less spot time than work remaining"
                );
            }
        }

        let mut plan = if slack_after_epoch {
            Plan::new(ClusterType::None, DecisionReason::Idle)
        } else {
            Plan::new(ClusterType::OnDemand, DecisionReason::NoSlack)
        };

        // Moving an on-demand cluster would restart its overhead
        let may_switch =
            plan.action == ClusterType::None || obs.last_cluster_type != ClusterType::OnDemand;
        plan.switch_to = recommendation
            .map(|rec| rec.region)
            .filter(|region| *region != obs.current_region && may_switch);
        plan
    }

    fn recommend(&self, obs: &Observation<'_>, epoch: usize) -> Option<Recommendation> {
        if !self.config.region_switching || obs.num_regions < 2 {
            return None;
        }
        let ctx = SelectionContext {
            epoch,
            num_regions: obs.num_regions,
            current_region: obs.current_region,
            current_has_spot: obs.has_spot,
            remaining_restart_overhead: obs.remaining_restart_overhead,
            trace: self.calibrator.view(),
            live: obs.live_spot.as_deref(),
        };
        self.selector.recommend(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Environment with hand-set fields; switching is recorded, nothing advances
    struct ScriptedEnv {
        elapsed: f64,
        regions: usize,
        region: usize,
        overhead: f64,
        done: Vec<f64>,
        live: Option<Vec<bool>>,
        switches: Vec<usize>,
    }

    impl ScriptedEnv {
        fn new(regions: usize) -> Self {
            Self {
                elapsed: 0.0,
                regions,
                region: 0,
                overhead: 0.0,
                done: Vec::new(),
                live: None,
                switches: Vec::new(),
            }
        }
    }

    impl Environment for ScriptedEnv {
        fn gap_seconds(&self) -> f64 {
            60.0
        }
        fn elapsed_seconds(&self) -> f64 {
            self.elapsed
        }
        fn num_regions(&self) -> usize {
            self.regions
        }
        fn current_region(&self) -> usize {
            self.region
        }
        fn switch_region(&mut self, idx: usize) {
            self.region = idx;
            self.switches.push(idx);
        }
        fn remaining_restart_overhead(&self) -> f64 {
            self.overhead
        }
        fn task_done_time(&self) -> &[f64] {
            &self.done
        }
        fn supports_multi_region_query(&self) -> bool {
            self.live.is_some()
        }
        fn spot_availability(&self) -> Option<Vec<bool>> {
            self.live.clone()
        }
    }

    fn engine(env: &ScriptedEnv, task: Task, index: Option<AvailabilityIndex>) -> DecisionEngine {
        DecisionEngine::for_environment(env, task, PolicyConfig::default(), index.map(Arc::new))
            .unwrap()
    }

    #[test]
    fn test_completed_task_returns_none() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(120.0, 1000.0, 0.0), None);
        env.done = vec![60.0, 60.0];
        env.elapsed = 120.0;

        assert_eq!(engine.step(&mut env, ClusterType::Spot, true), ClusterType::None);
        assert_eq!(engine.status(), EngineStatus::Completed);
        // Still done on later calls
        env.elapsed = 180.0;
        assert_eq!(engine.step(&mut env, ClusterType::None, true), ClusterType::None);
    }

    #[test]
    fn test_infeasible_task_always_on_demand() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(1000.0, 500.0, 0.0), None);
        assert_eq!(engine.status(), EngineStatus::Infeasible);
        assert!(engine.is_committed());
        assert_eq!(engine.step(&mut env, ClusterType::None, true), ClusterType::OnDemand);
    }

    #[test]
    fn test_malformed_task_forces_on_demand() {
        let mut env = ScriptedEnv::new(1);
        let task = Task::sanitized(Some(600.0), Some(f64::NAN), None);
        let mut engine = engine(&env, task, None);
        assert_eq!(engine.step(&mut env, ClusterType::None, true), ClusterType::OnDemand);
    }

    #[test]
    fn test_deadline_exceeded_is_reported() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(600.0, 600.0, 0.0), None);
        env.elapsed = 600.0;
        env.done = vec![300.0];

        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, false), ClusterType::OnDemand);
        assert_eq!(engine.status(), EngineStatus::DeadlineExceeded);
        match engine.failure() {
            Some(SkyhopError::DeadlineExceeded {
                remaining_work,
                elapsed,
            }) => {
                assert_eq!(remaining_work, 300.0);
                assert_eq!(elapsed, 600.0);
            }
            other => panic!("expected deadline failure, got {other:?}"),
        }
    }

    #[test]
    fn test_spot_taken_when_present() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(3600.0, 7200.0, 300.0), None);
        assert_eq!(engine.step(&mut env, ClusterType::None, true), ClusterType::Spot);
        assert!(!engine.is_committed());
    }

    #[test]
    fn test_idles_only_with_slack() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(3600.0, 7200.0, 300.0), None);
        // threshold = 3600 + 300 + 120 = 4020; idle while remaining - 60 >= 4020
        env.elapsed = 7200.0 - 4080.0;
        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::None);
        env.elapsed = 7200.0 - 4070.0;
        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::OnDemand);
        assert!(!engine.is_committed());
    }

    #[test]
    fn test_commit_is_one_way() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(3600.0, 7200.0, 300.0), None);
        env.elapsed = 7200.0 - 4020.0;
        assert_eq!(engine.step(&mut env, ClusterType::None, true), ClusterType::OnDemand);
        assert!(engine.is_committed());
        assert_eq!(engine.committed_at(), Some(3180.0));

        // Spot everywhere and a burst of reported progress: still on-demand
        env.elapsed += 60.0;
        env.done = vec![3000.0];
        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, true), ClusterType::OnDemand);
        assert!(engine.decision_state().committed);
    }

    #[test]
    fn test_mid_restart_holds_on_demand() {
        let mut env = ScriptedEnv::new(2);
        let index = AvailabilityIndex::build(vec![vec![false; 200], vec![true; 200]], 200);
        let mut engine = engine(&env, Task::new(3600.0, 10_000.0, 300.0), Some(index));
        env.overhead = 120.0;

        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, true), ClusterType::OnDemand);
        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, false), ClusterType::OnDemand);
        assert!(env.switches.is_empty());
    }

    #[test]
    fn test_mid_restart_holds_spot() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(3600.0, 10_000.0, 300.0), None);
        env.overhead = 120.0;
        assert_eq!(engine.step(&mut env, ClusterType::Spot, true), ClusterType::Spot);
    }

    #[test]
    fn test_leaving_on_demand_needs_slack() {
        let mut env = ScriptedEnv::new(1);
        let mut engine = engine(&env, Task::new(3600.0, 7200.0, 300.0), None);
        // Guard: 4060 > 3600 + 0 + 120, not committed. Leaving needs
        // 4060 - 60 >= 3600 + 300 + 120, which fails.
        env.elapsed = 7200.0 - 4060.0;
        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, true), ClusterType::OnDemand);
        assert!(!engine.is_committed());

        env.elapsed = 0.0;
        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, true), ClusterType::Spot);
    }

    #[test]
    fn test_prepositions_with_idle_when_slack() {
        let mut env = ScriptedEnv::new(2);
        let index = AvailabilityIndex::build(vec![vec![false; 200], vec![true; 200]], 200);
        let mut engine = engine(&env, Task::new(3600.0, 10_000.0, 300.0), Some(index));

        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::None);
        assert_eq!(env.switches, vec![1]);
        assert_eq!(engine.region_switches(), 1);
        assert_eq!(engine.decision_state().current_region, 1);
        assert_eq!(engine.last_recommendation().map(|r| r.region), Some(1));
    }

    #[test]
    fn test_no_switch_while_keeping_on_demand() {
        let mut env = ScriptedEnv::new(2);
        let index = AvailabilityIndex::build(vec![vec![false; 200], vec![true; 200]], 200);
        let mut engine = engine(&env, Task::new(3600.0, 7200.0, 300.0), Some(index));
        // No slack to idle: on-demand continues in place
        env.elapsed = 7200.0 - 4060.0;
        assert_eq!(engine.step(&mut env, ClusterType::OnDemand, false), ClusterType::OnDemand);
        assert!(env.switches.is_empty());

        // Not yet on-demand: may launch on-demand in the better region
        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::OnDemand);
        assert_eq!(env.switches, vec![1]);
    }

    #[test]
    fn test_live_query_capability_detected_once() {
        let mut env = ScriptedEnv::new(3);
        env.live = Some(vec![false, false, true]);
        let mut engine = engine(&env, Task::new(3600.0, 10_000.0, 0.0), None);
        assert!(engine.capabilities().has_multi_region_query);
        assert!(!engine.capabilities().has_trace_data);

        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::None);
        assert_eq!(env.switches, vec![2]);
    }

    #[test]
    fn test_without_traces_or_live_query_stays_put() {
        let mut env = ScriptedEnv::new(3);
        let mut engine = engine(&env, Task::new(3600.0, 10_000.0, 0.0), None);
        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::None);
        assert!(env.switches.is_empty());
        assert!(!engine.calibration().trust);
    }

    #[test]
    fn test_spot_outlook_from_trace() {
        let env = ScriptedEnv::new(2);
        let index = AvailabilityIndex::build(vec![vec![true; 10], vec![false; 10]], 10);
        let engine = engine(&env, Task::new(300.0, 600.0, 0.0), Some(index));
        assert_eq!(engine.spot_outlook(0.0), Some(600.0));
        assert_eq!(engine.spot_outlook(300.0), Some(300.0));
    }

    #[test]
    fn test_empty_spot_outlook_does_not_force_on_demand() {
        let mut env = ScriptedEnv::new(2);
        let index = AvailabilityIndex::build(vec![vec![false; 200]; 2], 200);
        let mut engine = engine(&env, Task::new(3600.0, 7200.0, 300.0), Some(index));

        assert_eq!(engine.spot_outlook(0.0), Some(0.0));
        // Still waits until the last safe moment
        assert_eq!(engine.step(&mut env, ClusterType::None, false), ClusterType::None);
        assert!(env.switches.is_empty());
        assert!(!engine.is_committed());
    }
}
