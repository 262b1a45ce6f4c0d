//! Powers off and generalizes the build VM.

use super::{finish, BuildContext, Step, StepAction};
use crate::cloud::{ImageParameters, VirtualMachineOps};
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use std::sync::Arc;

/// De-provisions the VM so it can act as an image source, then records the
/// parameters later publish steps build their requests from.
pub struct StepGeneralize {
    vms: Arc<dyn VirtualMachineOps>,
    ui: Arc<dyn Ui>,
}

impl StepGeneralize {
    /// Creates the step.
    pub fn new(vms: Arc<dyn VirtualMachineOps>, ui: Arc<dyn Ui>) -> Self {
        Self { vms, ui }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        let resource_group = state.require_string(keys::RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::COMPUTE_NAME)?;
        let vm_id = state.require_string(keys::VM_ID)?;

        self.ui.say(&format!("Powering off VM '{name}'"));
        self.vms.power_off_vm(&resource_group, &name, &ctx.cancel).await?;

        self.ui.say(&format!("Generalizing VM '{name}'"));
        self.vms.generalize_vm(&resource_group, &name).await?;

        let parameters = ImageParameters {
            location: state.require_string(keys::LOCATION)?,
            source_virtual_machine_id: Some(vm_id),
            tags: state.get_as(keys::TAGS)?.unwrap_or_default(),
        };
        state.put_as(keys::IMAGE_PARAMETERS, &parameters)
    }
}

impl std::fmt::Debug for StepGeneralize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGeneralize").finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepGeneralize {
    fn name(&self) -> &str {
        "generalize"
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
    use crate::errors::CloudError;
    use crate::testing::{ops, FakeCloud, FakeCloudCall, RecordingUi};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state() -> StateBag {
        let state = StateBag::new();
        state.put(keys::RESOURCE_GROUP_NAME, json!("rg"));
        state.put(keys::COMPUTE_NAME, json!("pkrvm1"));
        state.put(keys::VM_ID, json!("vm-1"));
        state.put(keys::LOCATION, json!("L"));
        state.put(keys::TAGS, json!({"t": "v"}));
        state
    }

    #[tokio::test]
    async fn test_writes_image_parameters() {
        let fake = Arc::new(FakeCloud::new());
        let ui = Arc::new(RecordingUi::new());
        let step = StepGeneralize::new(
            Arc::new(CloudClient::new(fake.clone(), Timeouts::new())),
            ui.clone(),
        );
        let state = state();

        assert_eq!(step.run(&BuildContext::new("test"), &state).await, StepAction::Continue);

        let parameters: ImageParameters = state.require(keys::IMAGE_PARAMETERS).unwrap();
        assert_eq!(parameters.source_virtual_machine_id.as_deref(), Some("vm-1"));
        assert_eq!(parameters.location, "L");
        assert_eq!(parameters.tags.get("t").map(String::as_str), Some("v"));
        assert_eq!(
            fake.calls(),
            vec![
                FakeCloudCall::PowerOffVm("pkrvm1".into()),
                FakeCloudCall::GeneralizeVm("pkrvm1".into()),
            ]
        );
        assert_eq!(ui.said().len(), 2);
    }

    #[tokio::test]
    async fn test_generalize_failure_halts_without_parameters() {
        let fake = Arc::new(FakeCloud::new());
        fake.fail_begin(
            ops::GENERALIZE_VM,
            CloudError::remote(ops::GENERALIZE_VM, "OperationNotAllowed", "VM is running"),
        );
        let ui = Arc::new(RecordingUi::new());
        let step = StepGeneralize::new(Arc::new(CloudClient::new(fake, Timeouts::new())), ui.clone());
        let state = state();

        let action = step.run(&BuildContext::new("test"), &state).await;

        assert!(action.is_halt());
        assert!(!state.contains(keys::IMAGE_PARAMETERS));
        assert_eq!(ui.errors().len(), 1);
    }
}
