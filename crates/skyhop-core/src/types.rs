//! Core types shared across Skyhop components

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SkyhopError};

/// Tolerance for floating-point epoch arithmetic (seconds / epochs)
const EPOCH_EPSILON: f64 = 1e-9;

/// Cluster type requested for (or observed during) an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    /// No cluster: idle this epoch
    #[default]
    None,
    /// Preemptible spot instance
    Spot,
    /// Guaranteed on-demand instance
    OnDemand,
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterType::None => write!(f, "NONE"),
            ClusterType::Spot => write!(f, "SPOT"),
            ClusterType::OnDemand => write!(f, "ON_DEMAND"),
        }
    }
}

/// A deadline-constrained task (all fields in seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Total compute time required
    pub duration: f64,
    /// Hard wall-clock deadline, measured from task start
    pub deadline: f64,
    /// Time lost after every (re)start during which no progress accrues
    pub restart_overhead: f64,
}

impl Task {
    /// Create a task, sanitizing malformed fields to zero
    pub fn new(duration: f64, deadline: f64, restart_overhead: f64) -> Self {
        Self::sanitized(Some(duration), Some(deadline), Some(restart_overhead))
    }

    /// Build a task from possibly missing or malformed fields.
    ///
    /// Missing, NaN, infinite, or negative values become `0.0`. A zero
    /// deadline makes the feasibility guard commit to on-demand immediately,
    /// so a bad configuration never crashes a run.
    pub fn sanitized(
        duration: Option<f64>,
        deadline: Option<f64>,
        restart_overhead: Option<f64>,
    ) -> Self {
        Task {
            duration: sanitize_field("duration", duration),
            deadline: sanitize_field("deadline", deadline),
            restart_overhead: sanitize_field("restart_overhead", restart_overhead),
        }
    }

    /// Whether the deadline leaves room for the work at all
    pub fn is_feasible_a_priori(&self) -> bool {
        self.deadline >= self.duration
    }

    /// Slack available before the deadline if the task ran uninterrupted
    pub fn slack(&self) -> f64 {
        self.deadline - self.duration
    }
}

fn sanitize_field(name: &str, value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        Some(v) => {
            warn!(field = name, value = v, "Malformed task field, defaulting to 0");
            0.0
        }
        None => {
            warn!(field = name, "Missing task field, defaulting to 0");
            0.0
        }
    }
}

/// Discretization of wall-clock time into fixed-size decision epochs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochGrid {
    pub gap_seconds: f64,
}

impl EpochGrid {
    /// Create a grid; the gap must be positive and finite
    pub fn new(gap_seconds: f64) -> Result<Self> {
        if !gap_seconds.is_finite() || gap_seconds <= 0.0 {
            return Err(SkyhopError::config(format!(
                "gap_seconds must be positive, got {gap_seconds}"
            )));
        }
        Ok(Self { gap_seconds })
    }

    /// Epoch index containing `elapsed` seconds (`floor(elapsed / gap)`)
    pub fn epoch_of(&self, elapsed: f64) -> usize {
        if !elapsed.is_finite() || elapsed <= 0.0 {
            return 0;
        }
        (elapsed / self.gap_seconds + EPOCH_EPSILON).floor() as usize
    }

    /// Number of epochs needed to cover `deadline`, plus `margin_epochs`
    pub fn horizon(&self, deadline: f64, margin_epochs: usize) -> usize {
        let epochs = if deadline.is_finite() && deadline > 0.0 {
            (deadline / self.gap_seconds - EPOCH_EPSILON).ceil().max(0.0) as usize
        } else {
            0
        };
        epochs + margin_epochs
    }

    /// Whole epochs needed to pay back `seconds` (`ceil(seconds / gap)`)
    pub fn epochs_for(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds / self.gap_seconds - EPOCH_EPSILON).ceil().max(0.0) as usize
    }
}

/// Optional capabilities of the environment and inputs, decided once at
/// engine construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Environment can report live spot availability for every region
    pub has_multi_region_query: bool,
    /// Historical per-region availability traces were supplied
    pub has_trace_data: bool,
}

/// Lifecycle status reported by a decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    /// Work remains and the deadline has not passed
    Running,
    /// All work is done
    Completed,
    /// The deadline passed with work remaining (terminal failure)
    DeadlineExceeded,
    /// The deadline is shorter than the task duration
    Infeasible,
}
