//! Build progress events.
//!
//! The runner and builder publish one event per lifecycle transition. The
//! event types are stable strings so external sinks can filter on them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A build began.
pub const BUILD_STARTED: &str = "build.started";
/// A build finished, successfully or not.
pub const BUILD_COMPLETED: &str = "build.completed";
/// A step's `run` is about to be invoked.
pub const STEP_STARTED: &str = "step.started";
/// A step's `run` returned continue.
pub const STEP_COMPLETED: &str = "step.completed";
/// A step's `run` returned halt.
pub const STEP_HALTED: &str = "step.halted";
/// A step's cleanup finished.
pub const STEP_CLEANUP: &str = "step.cleanup";
/// A step's cleanup failed or panicked.
pub const STEP_CLEANUP_FAILED: &str = "step.cleanup_failed";
