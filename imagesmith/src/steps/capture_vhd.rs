//! Captures the generalized OS disk as a VHD blob.

use super::{finish, BuildContext, Step, StepAction};
use crate::cloud::ImageOps;
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Copies the OS disk into a storage container. Only runs for VHD builds.
pub struct StepCaptureVhd {
    images: Arc<dyn ImageOps>,
    ui: Arc<dyn Ui>,
}

impl StepCaptureVhd {
    /// Creates the step.
    pub fn new(images: Arc<dyn ImageOps>, ui: Arc<dyn Ui>) -> Self {
        Self { images, ui }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        if !state.flag(keys::IS_VHD) {
            return Ok(());
        }
        let resource_group = state.require_string(keys::RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::COMPUTE_NAME)?;
        let container = state.require_string(keys::CAPTURE_CONTAINER_NAME)?;
        let prefix = state.require_string(keys::CAPTURE_NAME_PREFIX)?;

        self.ui
            .say(&format!("Capturing VHD of '{name}' into container '{container}'"));
        let uri = self
            .images
            .capture_vhd(&resource_group, &name, &container, &prefix, &ctx.cancel)
            .await?;
        self.ui.say(&format!("Captured VHD: {uri}"));
        state.put(keys::CAPTURED_VHD_URI, json!(uri));
        Ok(())
    }
}

impl std::fmt::Debug for StepCaptureVhd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCaptureVhd").finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepCaptureVhd {
    fn name(&self) -> &str {
        "capture_vhd"
    }

    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction {
        finish(self.ui.as_ref(), self.execute(ctx, state).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudClient;
    use crate::config::Timeouts;
    use crate::testing::{vhd_state, FakeCloud, RecordingUi};

    fn step(fake: &Arc<FakeCloud>) -> StepCaptureVhd {
        StepCaptureVhd::new(
            Arc::new(CloudClient::new(fake.clone(), Timeouts::new())),
            Arc::new(RecordingUi::new()),
        )
    }

    #[tokio::test]
    async fn test_skips_non_vhd_builds() {
        let fake = Arc::new(FakeCloud::new());
        let state = StateBag::new();

        assert_eq!(step(&fake).run(&BuildContext::new("test"), &state).await, StepAction::Continue);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_records_blob_uri() {
        let fake = Arc::new(FakeCloud::new());
        let state = vhd_state();
        state.put(keys::RESOURCE_GROUP_NAME, json!("rg"));
        state.put(keys::COMPUTE_NAME, json!("pkrvm1"));
        state.put(keys::CAPTURE_CONTAINER_NAME, json!("images"));
        state.put(keys::CAPTURE_NAME_PREFIX, json!("pkr"));

        assert_eq!(step(&fake).run(&BuildContext::new("test"), &state).await, StepAction::Continue);

        let uri = state.get_string(keys::CAPTURED_VHD_URI).unwrap().unwrap_or_default();
        assert!(uri.ends_with("/images/pkr-osDisk.vhd"), "{uri}");
    }

    #[tokio::test]
    async fn test_missing_container_halts() {
        let fake = Arc::new(FakeCloud::new());
        let state = vhd_state();
        state.put(keys::RESOURCE_GROUP_NAME, json!("rg"));
        state.put(keys::COMPUTE_NAME, json!("pkrvm1"));

        let action = step(&fake).run(&BuildContext::new("test"), &state).await;

        assert_eq!(
            action,
            StepAction::Halt(BuildError::missing_state(keys::CAPTURE_CONTAINER_NAME))
        );
        assert!(fake.calls().is_empty());
    }
}
