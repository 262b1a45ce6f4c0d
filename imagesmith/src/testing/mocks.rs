//! Recording doubles for steps and operator output.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::StateBag;
use crate::steps::{BuildContext, Step, StepAction};

/// Captures operator messages.
#[derive(Debug, Default)]
pub struct RecordingUi {
    said: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingUi {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress messages, in order.
    #[must_use]
    pub fn said(&self) -> Vec<String> {
        self.said.lock().clone()
    }

    /// Error messages, in order.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.said.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// Shared, ordered log of step invocations such as `run:a` and `cleanup:a`.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupBehaviour {
    Succeed,
    Fail,
    Panic,
}

/// A step that appends to a shared [`Journal`] and does nothing else.
#[derive(Debug)]
pub struct RecordingStep {
    name: String,
    journal: Journal,
    halt_with: Option<BuildError>,
    cancel_on_run: Option<String>,
    panic_on_run: bool,
    cleanup: CleanupBehaviour,
}

impl RecordingStep {
    /// Creates a step that continues and cleans up successfully.
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: Arc::clone(journal),
            halt_with: None,
            cancel_on_run: None,
            panic_on_run: false,
            cleanup: CleanupBehaviour::Succeed,
        }
    }

    /// `run` halts with `error`.
    #[must_use]
    pub fn halting(mut self, error: BuildError) -> Self {
        self.halt_with = Some(error);
        self
    }

    /// `run` cancels the build token and then continues.
    #[must_use]
    pub fn cancelling(mut self, reason: impl Into<String>) -> Self {
        self.cancel_on_run = Some(reason.into());
        self
    }

    /// `run` panics.
    #[must_use]
    pub fn panicking(mut self) -> Self {
        self.panic_on_run = true;
        self
    }

    /// `cleanup` reports a failure.
    #[must_use]
    pub fn failing_cleanup(mut self) -> Self {
        self.cleanup = CleanupBehaviour::Fail;
        self
    }

    /// `cleanup` panics.
    #[must_use]
    pub fn panicking_cleanup(mut self) -> Self {
        self.cleanup = CleanupBehaviour::Panic;
        self
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &BuildContext, _state: &StateBag) -> StepAction {
        self.journal.lock().push(format!("run:{}", self.name));
        assert!(!self.panic_on_run, "{} blew up", self.name);
        if let Some(reason) = &self.cancel_on_run {
            ctx.cancel.cancel(reason.clone());
        }
        match &self.halt_with {
            Some(err) => StepAction::Halt(err.clone()),
            None => StepAction::Continue,
        }
    }

    async fn cleanup(&self, ctx: &BuildContext, _state: &StateBag) -> Result<(), BuildError> {
        self.journal.lock().push(format!("cleanup:{}", self.name));
        assert!(!ctx.cancel.is_cancelled(), "cleanup must run detached");
        match self.cleanup {
            CleanupBehaviour::Succeed => Ok(()),
            CleanupBehaviour::Fail => Err(BuildError::Internal(format!("{} cleanup failed", self.name))),
            CleanupBehaviour::Panic => panic!("{} cleanup blew up", self.name),
        }
    }
}
