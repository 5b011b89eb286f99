//! Skyhop Simulation Engine
//!
//! Deadline-aware spot/on-demand scheduling across regions, plus an
//! epoch-stepped simulator for comparing policies.
//!
//! ```text
//! trace files ─▶ TraceIngestor ─▶ AvailabilityIndex ─┐ (shared, read-only)
//!                                                    ▼
//! Environment ─▶ DecisionEngine::step ─▶ ProgressTracker
//!                     │                  FeasibilityGuard
//!                     │                  Calibrator ─▶ RegionSelector
//!                     ▼
//!               ClusterType (+ switch_region)
//! ```

pub mod availability;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod feasibility;
pub mod policies;
pub mod progress;
pub mod region;
pub mod simulator;
pub mod spot_data;
pub mod trace;

pub use availability::AvailabilityIndex;
pub use config::{CalibrationConfig, PolicyConfig};
pub use engine::{DecisionEngine, DecisionReason, Plan};
pub use policies::SchedulingPolicy;
pub use simulator::{SimulatedEnvironment, SimulationResult, Simulator};
pub use trace::{Polarity, TraceSpec};
