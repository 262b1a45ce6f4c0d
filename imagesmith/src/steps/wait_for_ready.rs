//! Waits for the build VM to boot.

use super::{finish, BuildContext, Step, StepAction};
use crate::cloud::VirtualMachineOps;
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use std::sync::Arc;

/// Polls the VM's power state until it reports running.
pub struct StepWaitForReady {
    vms: Arc<dyn VirtualMachineOps>,
    ui: Arc<dyn Ui>,
}

impl StepWaitForReady {
    /// Creates the step.
    pub fn new(vms: Arc<dyn VirtualMachineOps>, ui: Arc<dyn Ui>) -> Self {
        Self { vms, ui }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        let resource_group = state.require_string(keys::RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::COMPUTE_NAME)?;

        self.ui.say(&format!("Waiting for VM '{name}' to start"));
        self.vms
            .wait_until_running(&resource_group, &name, &ctx.cancel)
            .await?;
        self.ui.say(&format!("VM '{name}' is running"));
        Ok(())
    }
}

impl std::fmt::Debug for StepWaitForReady {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepWaitForReady").finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepWaitForReady {
    fn name(&self) -> &str {
        "wait_for_ready"
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
    use crate::testing::{FakeCloud, RecordingUi};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn step(fake: &Arc<FakeCloud>, ui: &Arc<RecordingUi>) -> StepWaitForReady {
        StepWaitForReady::new(
            Arc::new(CloudClient::new(fake.clone(), Timeouts::new())),
            ui.clone(),
        )
    }

    #[tokio::test]
    async fn test_missing_vm_halts_with_not_found() {
        let fake = Arc::new(FakeCloud::new());
        let ui = Arc::new(RecordingUi::new());
        let state = StateBag::new();
        state.put(keys::RESOURCE_GROUP_NAME, json!("rg"));
        state.put(keys::COMPUTE_NAME, json!("pkrvm1"));

        let action = step(&fake, &ui).run(&BuildContext::new("test"), &state).await;

        assert_eq!(
            action,
            StepAction::Halt(BuildError::Cloud(CloudError::not_found("pkrvm1")))
        );
        assert_eq!(ui.errors().len(), 1);
        assert_eq!(fake.power_state_polls(), 0);
    }

    #[tokio::test]
    async fn test_missing_state_halts_without_remote_calls() {
        let fake = Arc::new(FakeCloud::new());
        let ui = Arc::new(RecordingUi::new());

        let action = step(&fake, &ui)
            .run(&BuildContext::new("test"), &StateBag::new())
            .await;

        assert!(matches!(action, StepAction::Halt(BuildError::MissingState { .. })));
        assert!(fake.calls().is_empty());
    }
}
