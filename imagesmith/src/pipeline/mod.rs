//! Pipeline execution.
//!
//! This module provides:
//! - The [`StepRunner`] phase machine
//! - The [`RunReport`] describing what ran and what was torn down

mod runner;

pub use runner::{CleanupFailure, RunReport, RunnerPhase, StepRunner};
