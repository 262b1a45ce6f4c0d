//! Operator-facing messages.

use tracing::{error, info};

/// Where steps report progress and failures meant for the person running the build.
pub trait Ui: Send + Sync {
    /// Reports progress.
    fn say(&self, message: &str);

    /// Reports a failure.
    fn error(&self, message: &str);
}

/// Writes operator messages through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        info!(target: "imagesmith::ui", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "imagesmith::ui", "{message}");
    }
}
