//! Sequential step runner with reverse-order teardown.

use crate::errors::BuildError;
use crate::events;
use crate::state::StateBag;
use crate::steps::{BuildContext, Step, StepAction};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the runner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerPhase {
    /// Not started.
    #[default]
    Pending,
    /// Running the step at this index.
    Running(usize),
    /// A step halted; no further `run` calls happen.
    Halted,
    /// Every step continued.
    Completed,
    /// Invoking `cleanup` in reverse order.
    CleaningUp,
    /// Teardown finished.
    Done,
}

/// A cleanup that failed or panicked. Logged, never escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// Step whose cleanup failed.
    pub step: String,
    /// What went wrong.
    pub message: String,
}

/// What happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Steps whose `run` was invoked, in order.
    pub attempted: Vec<String>,
    /// Steps whose `cleanup` succeeded, in the order they were cleaned up.
    pub cleaned_up: Vec<String>,
    /// Cleanups that failed.
    pub cleanup_failures: Vec<CleanupFailure>,
    /// The step that halted the build, if one did.
    pub halted_at: Option<String>,
    /// Every phase the runner passed through.
    pub phases: Vec<RunnerPhase>,
}

impl RunReport {
    /// The phase the runner ended in.
    #[must_use]
    pub fn final_phase(&self) -> RunnerPhase {
        self.phases.last().copied().unwrap_or_default()
    }
}

/// Runs steps in declared order and tears them down in reverse.
///
/// The first halt stops forward progress and its error is written to the
/// state's error slot. Cleanup then runs for every attempted step under a
/// detached context, so a cancelled build still reclaims its resources.
pub struct StepRunner {
    steps: Vec<Arc<dyn Step>>,
    phase: RwLock<RunnerPhase>,
}

impl StepRunner {
    /// Creates a runner over `steps`.
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            steps,
            phase: RwLock::new(RunnerPhase::Pending),
        }
    }

    /// Names of the configured steps, in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// The current phase. Readable while `run` is in progress.
    #[must_use]
    pub fn phase(&self) -> RunnerPhase {
        *self.phase.read()
    }

    fn enter(&self, report: &mut RunReport, phase: RunnerPhase) {
        debug!(?phase, "Runner phase");
        *self.phase.write() = phase;
        report.phases.push(phase);
    }

    /// Runs the build.
    ///
    /// The outcome is in `state`: the build failed if its error slot is set.
    pub async fn run(&self, ctx: &BuildContext, state: &StateBag) -> RunReport {
        let mut report = RunReport::default();
        self.enter(&mut report, RunnerPhase::Pending);

        let mut halted = false;
        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name().to_string();

            if ctx.cancel.is_cancelled() {
                let reason = ctx
                    .cancel
                    .reason()
                    .unwrap_or_else(|| "cancelled".to_string());
                warn!(step = %name, reason = %reason, "Build cancelled before step");
                state.set_error(BuildError::Cancelled(reason));
                halted = true;
                break;
            }

            self.enter(&mut report, RunnerPhase::Running(index));
            info!(step = %name, index, "Running step");
            ctx.events
                .emit(events::STEP_STARTED, Some(json!({ "step": name, "index": index })))
                .await;
            report.attempted.push(name.clone());

            let action = AssertUnwindSafe(step.run(ctx, state))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    StepAction::Halt(BuildError::Internal(format!(
                        "step {name} panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });

            match action {
                StepAction::Continue => {
                    ctx.events
                        .emit(events::STEP_COMPLETED, Some(json!({ "step": name })))
                        .await;
                }
                StepAction::Halt(err) => {
                    warn!(step = %name, error = %err, class = ?err.class(), "Step halted the build");
                    ctx.events
                        .emit(
                            events::STEP_HALTED,
                            Some(json!({ "step": name, "error": err.to_string() })),
                        )
                        .await;
                    state.set_error(err);
                    report.halted_at = Some(name);
                    halted = true;
                    break;
                }
            }
        }

        self.enter(
            &mut report,
            if halted {
                RunnerPhase::Halted
            } else {
                RunnerPhase::Completed
            },
        );

        self.enter(&mut report, RunnerPhase::CleaningUp);
        let teardown = ctx.detached();
        let attempted = report.attempted.len();
        for step in self.steps[..attempted].iter().rev() {
            let name = step.name().to_string();
            let outcome = AssertUnwindSafe(step.cleanup(&teardown, state))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(format!("cleanup panicked: {}", panic_message(panic.as_ref()))),
            };

            match failure {
                None => {
                    debug!(step = %name, "Cleaned up step");
                    ctx.events
                        .emit(events::STEP_CLEANUP, Some(json!({ "step": name })))
                        .await;
                    report.cleaned_up.push(name);
                }
                Some(message) => {
                    warn!(step = %name, error = %message, "Cleanup failed, continuing teardown");
                    ctx.events
                        .emit(
                            events::STEP_CLEANUP_FAILED,
                            Some(json!({ "step": name, "error": message })),
                        )
                        .await;
                    report.cleanup_failures.push(CleanupFailure { step: name, message });
                }
            }
        }

        self.enter(&mut report, RunnerPhase::Done);
        report
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("steps", &self.step_names())
            .field("phase", &self.phase())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
