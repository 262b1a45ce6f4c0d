//! Build steps.
//!
//! A step is one provisioning phase. The runner calls [`Step::run`] once, in
//! declared order, and [`Step::cleanup`] in reverse order for every step whose
//! `run` was invoked. Steps never panic or return errors across the boundary
//! on the forward path: a failure is a [`StepAction::Halt`] carrying the error.

mod capture_vhd;
mod create_resource_group;
mod delete_temp_resources;
mod deploy_vm;
mod generalize;
mod publish_managed_image;
mod publish_shared_image_gallery;
mod wait_for_ready;

pub use capture_vhd::StepCaptureVhd;
pub use create_resource_group::StepCreateResourceGroup;
pub use delete_temp_resources::StepDeleteTemporaryResources;
pub use deploy_vm::StepDeployVm;
pub use generalize::StepGeneralize;
pub use publish_managed_image::StepPublishToManagedImage;
pub use publish_shared_image_gallery::{build_publish_args, StepPublishToSharedImageGallery};
pub use wait_for_ready::StepWaitForReady;

use crate::cancellation::CancellationToken;
use crate::errors::{BuildError, CloudError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::Ui;
use crate::state::StateBag;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// What the runner should do after a step's `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Proceed to the next step.
    Continue,
    /// Stop forward progress and begin teardown.
    Halt(BuildError),
}

impl StepAction {
    /// Returns true for `Halt`.
    #[must_use]
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

/// Per-build context handed to every step.
#[derive(Clone)]
pub struct BuildContext {
    /// Human-readable build name used in logs.
    pub build_name: String,
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Cancellation for the whole build.
    pub cancel: Arc<CancellationToken>,
    /// Progress events.
    pub events: Arc<dyn EventSink>,
}

impl BuildContext {
    /// Creates a context with a fresh run id and no event sink.
    pub fn new(build_name: impl Into<String>) -> Self {
        Self {
            build_name: build_name.into(),
            run_id: Uuid::now_v7(),
            cancel: Arc::new(CancellationToken::new()),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// A copy with a fresh, never-cancelled token.
    ///
    /// Teardown runs under this so a cancelled build still reclaims its resources.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            cancel: Arc::new(CancellationToken::new()),
            ..self.clone()
        }
    }
}

impl Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("build_name", &self.build_name)
            .field("run_id", &self.run_id)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// One provisioning phase.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Stable step name used in logs, events and reports.
    fn name(&self) -> &str;

    /// Performs the step's work.
    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction;

    /// Best-effort reclamation of what `run` created.
    ///
    /// Called even if `run` failed partway, so it must inspect `state` to find
    /// out what actually exists. It keeps going past its own failures and
    /// reports the first one; the runner logs it and moves on.
    async fn cleanup(&self, _ctx: &BuildContext, _state: &StateBag) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Converts the outcome of a step body into an action, reporting failures to the operator.
pub(crate) fn finish(ui: &dyn Ui, result: Result<(), BuildError>) -> StepAction {
    match result {
        Ok(()) => StepAction::Continue,
        Err(err) => {
            ui.error(&err.to_string());
            StepAction::Halt(err)
        }
    }
}

/// Treats "already gone" as success during teardown.
pub(crate) fn ignore_not_found(result: Result<(), CloudError>) -> Result<(), CloudError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_context_keeps_identity() {
        let ctx = BuildContext::new("build");
        ctx.cancel.cancel("user abort");

        let detached = ctx.detached();

        assert_eq!(detached.run_id, ctx.run_id);
        assert_eq!(detached.build_name, "build");
        assert!(!detached.cancel.is_cancelled());
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(CloudError::not_found("vm"))).is_ok());
        assert!(ignore_not_found(Err(CloudError::remote("op", "Conflict", "busy"))).is_err());
    }
}
