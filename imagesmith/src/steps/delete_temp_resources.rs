//! Deletes the build VM once the image has been captured.

use super::{ignore_not_found, BuildContext, Step, StepAction};
use crate::cloud::VirtualMachineOps;
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Removes the VM and its OS disk after a successful capture.
///
/// Failures here do not fail the build: the image already exists. They are
/// reported so the operator can remove the leftovers by hand.
pub struct StepDeleteTemporaryResources {
    vms: Arc<dyn VirtualMachineOps>,
    ui: Arc<dyn Ui>,
}

impl StepDeleteTemporaryResources {
    /// Creates the step.
    pub fn new(vms: Arc<dyn VirtualMachineOps>, ui: Arc<dyn Ui>) -> Self {
        Self { vms, ui }
    }

    async fn delete(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        let resource_group = state.require_string(keys::RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::COMPUTE_NAME)?;
        let disk = state.require_string(keys::OS_DISK_NAME)?;

        self.ui.say(&format!("Deleting VM '{name}'"));
        let vm = ignore_not_found(self.vms.delete_vm(&resource_group, &name, &ctx.cancel).await);
        self.ui.say(&format!("Deleting OS disk '{disk}'"));
        let os_disk =
            ignore_not_found(self.vms.delete_disk(&resource_group, &disk, &ctx.cancel).await);

        vm.and(os_disk).map_err(BuildError::from)
    }
}

impl std::fmt::Debug for StepDeleteTemporaryResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDeleteTemporaryResources")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepDeleteTemporaryResources {
    fn name(&self) -> &str {
        "delete_temporary_resources"
    }

    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction {
        match self.delete(ctx, state).await {
            Ok(()) => {
                state.put(keys::TEMP_RESOURCES_DELETED, json!(true));
            }
            Err(BuildError::Cloud(err)) if err.is_cancellation() => {
                return StepAction::Halt(BuildError::Cloud(err));
            }
            Err(err) => {
                warn!(error = %err, "Failed to delete temporary resources");
                self.ui.error(&format!(
                    "Error deleting temporary resources, delete them manually: {err}"
                ));
            }
        }
        StepAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudClient;
    use crate::config::Timeouts;
    use crate::errors::CloudError;
    use crate::testing::{ops, FakeCloud, FakeCloudCall, RecordingUi};
    use pretty_assertions::assert_eq;

    fn state() -> StateBag {
        let state = StateBag::new();
        state.put(keys::RESOURCE_GROUP_NAME, json!("rg"));
        state.put(keys::COMPUTE_NAME, json!("pkrvm1"));
        state.put(keys::OS_DISK_NAME, json!("pkrvm1-osdisk"));
        state
    }

    #[tokio::test]
    async fn test_missing_resources_count_as_deleted() {
        let fake = Arc::new(FakeCloud::new());
        let ui = Arc::new(RecordingUi::new());
        let step = StepDeleteTemporaryResources::new(
            Arc::new(CloudClient::new(fake.clone(), Timeouts::new())),
            ui.clone(),
        );
        let state = state();

        assert_eq!(step.run(&BuildContext::new("test"), &state).await, StepAction::Continue);

        assert!(state.flag(keys::TEMP_RESOURCES_DELETED));
        assert_eq!(
            fake.calls(),
            vec![
                FakeCloudCall::DeleteVm("pkrvm1".into()),
                FakeCloudCall::DeleteDisk("pkrvm1-osdisk".into()),
            ]
        );
        assert!(ui.errors().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_fatal() {
        let fake = Arc::new(FakeCloud::new());
        fake.fail_begin(ops::DELETE_VM, CloudError::remote(ops::DELETE_VM, "Conflict", "busy"));
        let ui = Arc::new(RecordingUi::new());
        let step = StepDeleteTemporaryResources::new(
            Arc::new(CloudClient::new(fake.clone(), Timeouts::new())),
            ui.clone(),
        );
        let state = state();

        assert_eq!(step.run(&BuildContext::new("test"), &state).await, StepAction::Continue);

        assert!(!state.flag(keys::TEMP_RESOURCES_DELETED));
        assert_eq!(ui.errors().len(), 1);
        // The disk is still attempted after the VM delete fails.
        assert_eq!(fake.calls().len(), 2);
    }
}
