//! Deploys the build VM.

use super::{finish, ignore_not_found, BuildContext, Step, StepAction};
use crate::cloud::{virtual_machine_id, VirtualMachineOps, VmSpec};
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Creates the VM the image is built on and records its resource id.
pub struct StepDeployVm {
    vms: Arc<dyn VirtualMachineOps>,
    ui: Arc<dyn Ui>,
}

impl StepDeployVm {
    /// Creates the step.
    pub fn new(vms: Arc<dyn VirtualMachineOps>, ui: Arc<dyn Ui>) -> Self {
        Self { vms, ui }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        let subscription = state.require_string(keys::SUBSCRIPTION_ID)?;
        let spec = VmSpec {
            resource_group: state.require_string(keys::RESOURCE_GROUP_NAME)?,
            name: state.require_string(keys::COMPUTE_NAME)?,
            location: state.require_string(keys::LOCATION)?,
            size: state.require_string(keys::VM_SIZE)?,
            source_image: state.require_string(keys::SOURCE_IMAGE)?,
            os_disk_name: state.require_string(keys::OS_DISK_NAME)?,
            tags: state.get_as(keys::TAGS)?.unwrap_or_default(),
        };

        self.ui.say(&format!(
            "Deploying VM '{}' ({}) in resource group '{}'",
            spec.name, spec.size, spec.resource_group
        ));
        state.put(keys::VM_DEPLOY_ATTEMPTED, json!(true));
        let reported = self.vms.create_vm(&spec, &ctx.cancel).await?;

        let vm_id = reported
            .unwrap_or_else(|| virtual_machine_id(&subscription, &spec.resource_group, &spec.name));
        debug!(vm_id = %vm_id, "VM deployed");
        state.put(keys::VM_ID, json!(vm_id));
        Ok(())
    }
}

impl std::fmt::Debug for StepDeployVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDeployVm").finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepDeployVm {
    fn name(&self) -> &str {
        "deploy_vm"
    }

    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction {
        finish(self.ui.as_ref(), self.execute(ctx, state).await)
    }

    /// Deletes the VM and its OS disk when they live in a group the build does
    /// not own. A temporary group is reclaimed wholesale by its own step.
    async fn cleanup(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        if !state.flag(keys::VM_DEPLOY_ATTEMPTED)
            || !state.flag(keys::IS_EXISTING_RESOURCE_GROUP)
            || state.flag(keys::TEMP_RESOURCES_DELETED)
        {
            return Ok(());
        }
        let resource_group = state.require_string(keys::RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::COMPUTE_NAME)?;
        let disk = state.require_string(keys::OS_DISK_NAME)?;

        self.ui.say(&format!("Deleting VM '{name}' and disk '{disk}'"));
        let vm = ignore_not_found(self.vms.delete_vm(&resource_group, &name, &ctx.cancel).await);
        // The disk outlives a failed VM delete, so try it regardless.
        let os_disk =
            ignore_not_found(self.vms.delete_disk(&resource_group, &disk, &ctx.cancel).await);

        for err in [&vm, &os_disk].into_iter().filter_map(|r| r.as_ref().err()) {
            warn!(resource_group = %resource_group, error = %err, "Failed to delete build resource");
            self.ui
                .error(&format!("Error deleting build resources, delete them manually: {err}"));
        }
        vm.and(os_disk).map_err(BuildError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudClient;
    use crate::config::Timeouts;
    use crate::testing::{FakeCloud, FakeCloudCall, RecordingUi};
    use pretty_assertions::assert_eq;

    fn state(existing: bool) -> StateBag {
        let state = StateBag::new();
        state.put(keys::SUBSCRIPTION_ID, json!("sub"));
        state.put(keys::RESOURCE_GROUP_NAME, json!("rg"));
        state.put(keys::IS_EXISTING_RESOURCE_GROUP, json!(existing));
        state.put(keys::COMPUTE_NAME, json!("pkrvm1"));
        state.put(keys::LOCATION, json!("westus"));
        state.put(keys::VM_SIZE, json!("Standard_A1"));
        state.put(keys::SOURCE_IMAGE, json!("Canonical:UbuntuServer:18.04-LTS:latest"));
        state.put(keys::OS_DISK_NAME, json!("pkrvm1-osdisk"));
        state
    }

    fn setup() -> (Arc<FakeCloud>, StepDeployVm) {
        let fake = Arc::new(FakeCloud::new());
        let client = Arc::new(CloudClient::new(fake.clone(), Timeouts::new()));
        (fake, StepDeployVm::new(client, Arc::new(RecordingUi::new())))
    }

    #[tokio::test]
    async fn test_records_vm_id() {
        let (fake, step) = setup();
        let ctx = BuildContext::new("test");
        let state = state(false);

        assert_eq!(step.run(&ctx, &state).await, StepAction::Continue);

        assert!(fake.has_vm("pkrvm1"));
        assert_eq!(
            state.get_string(keys::VM_ID).unwrap().as_deref(),
            Some("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/pkrvm1")
        );
    }

    #[tokio::test]
    async fn test_cleanup_in_temp_group_leaves_vm_to_group_delete() {
        let (fake, step) = setup();
        let ctx = BuildContext::new("test");
        let state = state(false);
        step.run(&ctx, &state).await;

        step.cleanup(&ctx, &state).await.unwrap();

        assert!(fake.has_vm("pkrvm1"));
    }

    #[tokio::test]
    async fn test_cleanup_in_existing_group_deletes_vm_and_disk() {
        let (fake, step) = setup();
        let ctx = BuildContext::new("test");
        let state = state(true);
        step.run(&ctx, &state).await;

        step.cleanup(&ctx, &state).await.unwrap();

        assert!(!fake.has_vm("pkrvm1"));
        assert_eq!(
            fake.calls()[1..].to_vec(),
            vec![
                FakeCloudCall::DeleteVm("pkrvm1".into()),
                FakeCloudCall::DeleteDisk("pkrvm1-osdisk".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_skipped_after_temp_resources_deleted() {
        let (fake, step) = setup();
        let ctx = BuildContext::new("test");
        let state = state(true);
        step.run(&ctx, &state).await;
        state.put(keys::TEMP_RESOURCES_DELETED, json!(true));

        step.cleanup(&ctx, &state).await.unwrap();

        assert_eq!(fake.calls().len(), 1);
    }
}
