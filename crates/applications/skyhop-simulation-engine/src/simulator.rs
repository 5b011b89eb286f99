//! Epoch-stepped simulator for deadline-constrained spot scheduling
//!
//! [`SimulatedEnvironment`] implements the [`Environment`] handle over
//! ground-truth per-region availability. [`Simulator`] drives a
//! [`SchedulingPolicy`] against it until the task completes or the deadline
//! passes, and collects a [`SimulationResult`] to compare policies.
//!
//! ## Cluster model
//!
//! - Any (re)start pays `restart_overhead` before progress accrues: a new
//!   cluster type, a region change, or relaunch after idling or preemption
//! - Spot is preempted at an epoch boundary when the region loses
//!   availability; the preempted cluster's pending overhead is dropped
//! - Requesting spot where none is available yields an idle epoch
//! - Progress per epoch is `gap - overhead_paid`, capped at the work left

use serde::{Deserialize, Serialize};
use skyhop_core::{ClusterType, Environment, Task};
use tracing::{debug, warn};

use crate::policies::SchedulingPolicy;

const FINISH_EPSILON: f64 = 1e-6;

/// What happened during one applied epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochOutcome {
    pub progress: f64,
    pub overhead_paid: f64,
    /// Seconds the cluster was held (billed) this epoch
    pub billed_seconds: f64,
    pub preempted: bool,
}

/// Simulated multi-region environment
#[derive(Debug, Clone)]
pub struct SimulatedEnvironment {
    gap_seconds: f64,
    /// Ground truth `[region][epoch]`
    availability: Vec<Vec<bool>>,
    restart_overhead: f64,
    multi_region_query: bool,

    elapsed: f64,
    epoch: usize,
    region: usize,
    cluster: ClusterType,
    cluster_region: usize,
    remaining_overhead: f64,
    done: Vec<f64>,

    // Metrics
    region_switches: usize,
    preemptions: usize,
    invalid_spot_requests: usize,
}

impl SimulatedEnvironment {
    /// Create an environment starting in region 0 with no cluster
    pub fn new(availability: Vec<Vec<bool>>, gap_seconds: f64, restart_overhead: f64) -> Self {
        SimulatedEnvironment {
            gap_seconds,
            availability,
            restart_overhead: restart_overhead.max(0.0),
            multi_region_query: false,
            elapsed: 0.0,
            epoch: 0,
            region: 0,
            cluster: ClusterType::None,
            cluster_region: 0,
            remaining_overhead: 0.0,
            done: Vec::new(),
            region_switches: 0,
            preemptions: 0,
            invalid_spot_requests: 0,
        }
    }

    /// Expose live availability of every region to policies
    pub fn with_multi_region_query(mut self, enabled: bool) -> Self {
        self.multi_region_query = enabled;
        self
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Cluster running after the last epoch (NONE once preempted)
    pub fn cluster_type(&self) -> ClusterType {
        self.cluster
    }

    fn available(&self, region: usize, epoch: usize) -> bool {
        self.availability
            .get(region)
            .and_then(|r| r.get(epoch))
            .copied()
            .unwrap_or(false)
    }

    /// Spot availability in the current region at the current epoch
    pub fn has_spot(&self) -> bool {
        self.available(self.region, self.epoch)
    }

    pub fn work_done(&self) -> f64 {
        self.done.iter().sum()
    }

    pub fn region_switches(&self) -> usize {
        self.region_switches
    }

    pub fn preemptions(&self) -> usize {
        self.preemptions
    }

    pub fn invalid_spot_requests(&self) -> usize {
        self.invalid_spot_requests
    }

    /// Run `action` for one epoch and advance the clock
    pub fn apply(&mut self, action: ClusterType, remaining_work: f64) -> EpochOutcome {
        let mut action = action;
        if action == ClusterType::Spot && !self.has_spot() {
            warn!(
                region = self.region,
                epoch = self.epoch,
                "Spot requested where none is available"
            );
            self.invalid_spot_requests += 1;
            action = ClusterType::None;
        }

        if action == ClusterType::None {
            self.cluster = ClusterType::None;
            self.remaining_overhead = 0.0;
        } else if action != self.cluster || self.cluster_region != self.region {
            self.cluster = action;
            self.cluster_region = self.region;
            self.remaining_overhead = self.restart_overhead;
        }

        let overhead_paid = self.remaining_overhead.min(self.gap_seconds);
        self.remaining_overhead -= overhead_paid;
        let progress = if action == ClusterType::None {
            0.0
        } else {
            (self.gap_seconds - overhead_paid)
                .min(remaining_work.max(0.0))
                .max(0.0)
        };
        let billed_seconds = match action {
            ClusterType::None => 0.0,
            _ if progress + FINISH_EPSILON >= remaining_work => overhead_paid + progress,
            _ => self.gap_seconds,
        };

        self.done.push(progress);
        self.elapsed += self.gap_seconds;
        self.epoch += 1;

        let preempted =
            self.cluster == ClusterType::Spot && !self.available(self.cluster_region, self.epoch);
        if preempted {
            debug!(region = self.cluster_region, epoch = self.epoch, "Spot preempted");
            self.cluster = ClusterType::None;
            self.remaining_overhead = 0.0;
            self.preemptions += 1;
        }

        EpochOutcome {
            progress,
            overhead_paid,
            billed_seconds,
            preempted,
        }
    }
}

impl Environment for SimulatedEnvironment {
    fn gap_seconds(&self) -> f64 {
        self.gap_seconds
    }

    fn elapsed_seconds(&self) -> f64 {
        self.elapsed
    }

    fn num_regions(&self) -> usize {
        self.availability.len()
    }

    fn current_region(&self) -> usize {
        self.region
    }

    fn switch_region(&mut self, idx: usize) {
        if idx != self.region {
            self.region_switches += 1;
        }
        self.region = idx;
    }

    fn remaining_restart_overhead(&self) -> f64 {
        self.remaining_overhead
    }

    fn task_done_time(&self) -> &[f64] {
        &self.done
    }

    fn supports_multi_region_query(&self) -> bool {
        self.multi_region_query
    }

    fn spot_availability(&self) -> Option<Vec<bool>> {
        self.multi_region_query.then(|| {
            (0..self.availability.len())
                .map(|r| self.available(r, self.epoch))
                .collect()
        })
    }
}

/// One simulated epoch, as seen before the policy was asked
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub elapsed: f64,
    pub region: usize,
    pub last_cluster_type: ClusterType,
    pub has_spot: bool,
    pub work_done: f64,
    pub remaining_restart_overhead: f64,
    pub action: ClusterType,
    pub switched_to: Option<usize>,
}

/// Result of a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub policy_name: String,
    pub completed: bool,
    pub deadline_met: bool,
    pub finish_time: Option<f64>,
    pub epochs: usize,
    pub work_done: f64,
    pub spot_seconds: f64,
    pub on_demand_seconds: f64,
    pub idle_seconds: f64,
    pub spot_work_seconds: f64,
    pub on_demand_work_seconds: f64,
    pub preemptions: usize,
    pub region_switches: usize,
    pub invalid_spot_requests: usize,
    pub committed_at: Option<f64>,
    pub total_cost: f64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub timeline: Vec<EpochRecord>,
}

/// Drives one policy over one environment
#[derive(Debug, Clone)]
pub struct Simulator {
    task: Task,
    spot_price: f64,
    on_demand_price: f64,
    record_timeline: bool,
}

impl Simulator {
    /// Create a simulator; prices are per hour and only used for reporting
    pub fn new(task: Task, spot_price: f64, on_demand_price: f64) -> Self {
        Simulator {
            task,
            spot_price,
            on_demand_price,
            record_timeline: false,
        }
    }

    /// Keep a per-epoch timeline in the result
    pub fn with_timeline(mut self, enabled: bool) -> Self {
        self.record_timeline = enabled;
        self
    }

    /// Run until the task completes or the deadline passes
    pub fn run(
        &self,
        policy: &mut dyn SchedulingPolicy,
        env: &mut SimulatedEnvironment,
    ) -> SimulationResult {
        let gap = env.gap_seconds();
        let mut finish_time = None;
        let mut timeline = Vec::new();
        let (mut spot_seconds, mut on_demand_seconds, mut idle_seconds) = (0.0, 0.0, 0.0);
        let (mut spot_work, mut on_demand_work) = (0.0, 0.0);
        let mut epochs = 0;

        while env.elapsed_seconds() + FINISH_EPSILON < self.task.deadline {
            let work_done = env.work_done();
            let remaining_work = self.task.duration - work_done;
            if remaining_work <= FINISH_EPSILON {
                break;
            }

            let elapsed = env.elapsed_seconds();
            let region_before = env.current_region();
            let last = env.cluster_type();
            let has_spot = env.has_spot();
            let remaining_overhead = env.remaining_restart_overhead();

            let action = policy.step(env, last, has_spot);
            let switched_to = (env.current_region() != region_before).then(|| env.current_region());
            let outcome = env.apply(action, remaining_work);
            epochs += 1;

            match action {
                ClusterType::Spot if outcome.billed_seconds > 0.0 => {
                    spot_seconds += outcome.billed_seconds;
                    spot_work += outcome.progress;
                }
                ClusterType::OnDemand => {
                    on_demand_seconds += outcome.billed_seconds;
                    on_demand_work += outcome.progress;
                }
                _ => idle_seconds += gap,
            }

            if self.record_timeline {
                timeline.push(EpochRecord {
                    epoch: epochs - 1,
                    elapsed,
                    region: region_before,
                    last_cluster_type: last,
                    has_spot,
                    work_done,
                    remaining_restart_overhead: remaining_overhead,
                    action,
                    switched_to,
                });
            }

            if outcome.progress > 0.0 && outcome.progress + FINISH_EPSILON >= remaining_work {
                finish_time = Some(elapsed + outcome.overhead_paid + outcome.progress);
            }
        }

        let work_done = env.work_done();
        let completed = work_done + FINISH_EPSILON >= self.task.duration;
        // A zero-length task is done before it starts
        let finish_time = finish_time.or(completed.then_some(0.0));
        let deadline_met =
            completed && finish_time.is_some_and(|t| t <= self.task.deadline + FINISH_EPSILON);

        let total_cost = (spot_seconds * self.spot_price + on_demand_seconds * self.on_demand_price)
            / 3600.0;

        SimulationResult {
            policy_name: policy.name().to_string(),
            completed,
            deadline_met,
            finish_time,
            epochs,
            work_done,
            spot_seconds,
            on_demand_seconds,
            idle_seconds,
            spot_work_seconds: spot_work,
            on_demand_work_seconds: on_demand_work,
            preemptions: env.preemptions(),
            region_switches: env.region_switches(),
            invalid_spot_requests: env.invalid_spot_requests(),
            committed_at: policy.committed_at(),
            total_cost,
            timeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityIndex;
    use crate::config::PolicyConfig;
    use crate::engine::DecisionEngine;
    use crate::policies::{GreedySpotPolicy, OnDemandOnlyPolicy};
    use crate::spot_data::AvailabilityGenerator;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn engine_for(
        env: &SimulatedEnvironment,
        task: Task,
        trace: Option<Vec<Vec<bool>>>,
    ) -> DecisionEngine {
        let index = trace.map(|regions| {
            let horizon = skyhop_core::grid_of(env)
                .unwrap()
                .horizon(task.deadline, PolicyConfig::default().horizon_margin_epochs);
            Arc::new(AvailabilityIndex::build(regions, horizon))
        });
        DecisionEngine::for_environment(env, task, PolicyConfig::default(), index).unwrap()
    }

    fn run(
        task: Task,
        truth: Vec<Vec<bool>>,
        trace: Option<Vec<Vec<bool>>>,
        gap: f64,
    ) -> (SimulationResult, DecisionEngine) {
        let mut env = SimulatedEnvironment::new(truth, gap, task.restart_overhead);
        let mut engine = engine_for(&env, task, trace);
        let result = Simulator::new(task, 0.3, 1.0)
            .with_timeline(true)
            .run(&mut engine, &mut env);
        (result, engine)
    }

    #[test]
    fn test_environment_overhead_and_progress() {
        let mut env = SimulatedEnvironment::new(vec![vec![true; 10]], 60.0, 90.0);
        let first = env.apply(ClusterType::Spot, 1000.0);
        assert_eq!(first.progress, 0.0);
        assert_eq!(env.remaining_restart_overhead(), 30.0);

        let second = env.apply(ClusterType::Spot, 1000.0);
        assert_eq!(second.progress, 30.0);
        assert_eq!(env.remaining_restart_overhead(), 0.0);

        // Changing type restarts the overhead
        env.apply(ClusterType::OnDemand, 1000.0);
        assert_eq!(env.remaining_restart_overhead(), 30.0);
        assert_eq!(env.work_done(), 30.0);
    }

    #[test]
    fn test_environment_preemption_and_invalid_spot() {
        let mut env = SimulatedEnvironment::new(vec![vec![true, false, false]], 60.0, 0.0);
        let outcome = env.apply(ClusterType::Spot, 1000.0);
        assert!(outcome.preempted);
        assert_eq!(env.cluster_type(), ClusterType::None);
        assert_eq!(env.preemptions(), 1);

        let outcome = env.apply(ClusterType::Spot, 1000.0);
        assert_eq!(outcome.progress, 0.0);
        assert_eq!(env.invalid_spot_requests(), 1);
    }

    #[test]
    fn test_environment_region_switch_restarts_cluster() {
        let mut env = SimulatedEnvironment::new(vec![vec![true; 5], vec![true; 5]], 60.0, 60.0)
            .with_multi_region_query(true);
        env.apply(ClusterType::OnDemand, 1000.0);
        env.apply(ClusterType::OnDemand, 1000.0);
        assert_eq!(env.work_done(), 60.0);

        env.switch_region(1);
        let outcome = env.apply(ClusterType::OnDemand, 1000.0);
        assert_eq!(outcome.overhead_paid, 60.0);
        assert_eq!(env.region_switches(), 1);
        assert_eq!(env.spot_availability(), Some(vec![true, true]));
    }

    #[test]
    fn test_scenario_a_all_false_commits_once_and_wastes_nothing() {
        let task = Task::new(3600.0, 7200.0, 300.0);
        let never = vec![AvailabilityGenerator::never(200)];
        let (result, engine) = run(task, never.clone(), Some(never), 60.0);

        assert!(result.completed && result.deadline_met);
        // Threshold: remaining_time <= 3600 + 300 + 120, first hit at 7200 - 4020
        assert_eq!(engine.committed_at(), Some(3180.0));
        let first_on_demand = result
            .timeline
            .iter()
            .position(|r| r.action == ClusterType::OnDemand)
            .unwrap();
        assert_eq!(result.timeline[first_on_demand].elapsed, 3180.0);
        assert!(result.timeline[first_on_demand..]
            .iter()
            .all(|r| r.action == ClusterType::OnDemand));
        assert!(result.timeline[..first_on_demand]
            .iter()
            .all(|r| r.action == ClusterType::None));

        assert_eq!(result.on_demand_work_seconds, 3600.0);
        assert_eq!(result.on_demand_seconds, 3900.0);
        assert_eq!(result.spot_seconds, 0.0);
        assert_eq!(result.finish_time, Some(7080.0));
    }

    #[test]
    fn test_scenario_b_all_true_runs_spot_every_epoch() {
        let task = Task::new(1000.0, 1200.0, 0.0);
        let always = vec![AvailabilityGenerator::always(200)];
        let (result, engine) = run(task, always.clone(), Some(always), 10.0);

        assert_eq!(result.epochs, 100);
        assert!(result.timeline.iter().all(|r| r.action == ClusterType::Spot));
        assert_eq!(result.finish_time, Some(1000.0));
        assert!(result.deadline_met);
        assert!(engine.committed_at().is_none());
        assert_eq!(result.on_demand_seconds, 0.0);
    }

    #[test]
    fn test_scenario_c_switches_instead_of_idling_through_outage() {
        let task = Task::new(3600.0, 4800.0, 120.0);
        let regions = vec![
            AvailabilityGenerator::outage(200, 0, 50),
            AvailabilityGenerator::always(200),
        ];
        let (result, engine) = run(task, regions.clone(), Some(regions), 60.0);

        assert!(result.deadline_met);
        assert_eq!(result.timeline[0].action, ClusterType::None);
        assert_eq!(result.timeline[0].switched_to, Some(1));
        assert_eq!(result.timeline[1].action, ClusterType::Spot);
        assert_eq!(result.spot_work_seconds, 3600.0);
        assert_eq!(result.on_demand_seconds, 0.0);
        assert_eq!(engine.region_switches(), 1);
    }

    #[test]
    fn test_scenario_c_short_outage_waits_in_place() {
        let task = Task::new(1200.0, 6000.0, 60.0);
        let region = vec![AvailabilityGenerator::outage(200, 0, 3)];
        let (result, _) = run(task, region.clone(), Some(region), 60.0);

        assert!(result.deadline_met);
        let actions: Vec<_> = result.timeline.iter().take(4).map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                ClusterType::None,
                ClusterType::None,
                ClusterType::None,
                ClusterType::Spot
            ]
        );
        assert_eq!(result.on_demand_seconds, 0.0);
    }

    #[test]
    fn test_scenario_d_negated_trace_revokes_trust_and_stops_switching() {
        let task = Task::new(1800.0, 7200.0, 60.0);
        let trace = vec![AvailabilityGenerator::always(200); 2];
        let truth = vec![AvailabilityGenerator::never(200); 2];
        let (result, engine) = run(task, truth, Some(trace), 60.0);

        let calibration = engine.calibration();
        assert!(!calibration.trust);
        let revoked_at = engine.trust_revoked_at().unwrap();

        // Trace-driven switching happened, and stopped once trust was gone
        let switch_epochs: Vec<usize> = result
            .timeline
            .iter()
            .filter(|r| r.switched_to.is_some())
            .map(|r| r.epoch)
            .collect();
        assert!(!switch_epochs.is_empty());
        assert!(switch_epochs.iter().all(|e| *e < revoked_at));

        // Falls back to has_spot-only behavior: wait, then finish on-demand
        assert!(result.deadline_met);
        assert_eq!(result.spot_seconds, 0.0);
    }

    #[test]
    fn test_scenario_d_negated_periodic_trace_revokes_trust() {
        let task = Task::new(1800.0, 7200.0, 60.0);
        let periodic: Vec<bool> = (0..200).map(|t| (t / 3) % 2 == 0).collect();
        let negated: Vec<bool> = periodic.iter().map(|a| !a).collect();
        let (result, engine) = run(
            task,
            vec![negated.clone(), negated],
            Some(vec![periodic.clone(), periodic]),
            60.0,
        );

        assert!(!engine.calibration().trust);
        let revoked_at = engine.trust_revoked_at().unwrap();
        assert_eq!(revoked_at, 7);
        assert!(result
            .timeline
            .iter()
            .filter(|r| r.switched_to.is_some())
            .all(|r| r.epoch < revoked_at));
        assert!(result.deadline_met);
    }

    #[test]
    fn test_baselines_compare() {
        let task = Task::new(1800.0, 3600.0, 60.0);
        let truth = AvailabilityGenerator::new(8.0, 4.0).generate_regions(3, 1, 200);

        let simulator = Simulator::new(task, 0.3, 1.0);
        let mut env = SimulatedEnvironment::new(truth.clone(), 60.0, 60.0);
        let ondemand = simulator.run(&mut OnDemandOnlyPolicy::new(task.duration), &mut env);
        assert!(ondemand.deadline_met);
        assert_eq!(ondemand.on_demand_seconds, 1860.0);
        assert_eq!(ondemand.committed_at, Some(0.0));

        let mut env = SimulatedEnvironment::new(truth, 60.0, 60.0);
        let greedy = simulator.run(&mut GreedySpotPolicy::new(), &mut env);
        assert_eq!(greedy.policy_name, "GreedySpot");
        assert_eq!(greedy.invalid_spot_requests, 0);
        assert!(greedy.total_cost > 0.0);
    }

    /// Safety and invariant properties over random tasks and traces
    #[test]
    fn test_random_runs_never_miss_feasible_deadlines() {
        let mut rng = StdRng::seed_from_u64(2024);

        for case in 0..60 {
            let regions = rng.gen_range(1..=3);
            let gap = [10.0, 60.0, 300.0][case % 3];
            let duration = rng.gen_range(600.0..8000.0);
            let restart_overhead = rng.gen_range(0.0..900.0);
            let slack = rng.gen_range(0.0..duration * 1.5);
            let task = Task::new(duration, duration + restart_overhead + slack, restart_overhead);

            let epochs = (task.deadline / gap).ceil() as usize + 10;
            let generator =
                AvailabilityGenerator::new(rng.gen_range(1.0..30.0), rng.gen_range(1.0..30.0));
            let truth = generator.generate_regions(rng.r#gen(), regions, epochs);

            // Perfect, negated, phase-shifted, or no predictions
            let trace = match case % 4 {
                0 => Some(truth.clone()),
                1 => Some(
                    truth
                        .iter()
                        .map(|r| r.iter().map(|a| !a).collect())
                        .collect(),
                ),
                2 => Some(truth.iter().map(|r| r[2.min(r.len())..].to_vec()).collect()),
                _ => None,
            };

            let (result, engine) = run(task, truth, trace, gap);
            assert!(
                result.deadline_met,
                "case {case}: {task:?} finished at {:?}",
                result.finish_time
            );
            assert_eq!(result.invalid_spot_requests, 0, "case {case}");

            let margin = engine.safety_margin();
            let mut committed = false;
            let mut last_work = 0.0;
            for record in &result.timeline {
                // Monotonic progress
                assert!(record.work_done >= last_work);
                last_work = record.work_done;

                let remaining_time = task.deadline - record.elapsed;
                let remaining_work = task.duration - record.work_done;

                // Idle only when one more epoch still leaves on-demand feasible
                if record.action == ClusterType::None {
                    assert!(
                        remaining_time - gap >= remaining_work + restart_overhead + margin - 1e-6,
                        "case {case}: unsafe idle at epoch {}",
                        record.epoch
                    );
                }

                // No switching while restart overhead is being paid
                if record.remaining_restart_overhead > 0.0 {
                    assert!(record.switched_to.is_none(), "case {case}");
                    assert!(
                        record.action == record.last_cluster_type
                            || record.action == ClusterType::OnDemand,
                        "case {case}: type change mid-restart at epoch {}",
                        record.epoch
                    );
                }

                // Commit is one-way
                if let Some(at) = engine.committed_at() {
                    if record.elapsed >= at {
                        committed = true;
                    }
                }
                if committed {
                    assert_eq!(record.action, ClusterType::OnDemand, "case {case}");
                }
            }
        }
    }
}
