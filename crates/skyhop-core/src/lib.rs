//! Skyhop Core - Shared types and traits
//!
//! This crate defines the core abstractions used across:
//! - skyhop-simulation-engine (decision engine, simulator)
//! - skyhop-sim (CLI)
//!
//! Key types:
//! - Environment trait (the handle a scheduling policy drives each epoch)
//! - Task, epoch grid, and cluster types
//! - Error types

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
