//! Creates the temporary resource group, or checks the configured one exists.

use super::{finish, BuildContext, Step, StepAction};
use crate::cloud::ResourceGroupOps;
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Provisions the resource group the build runs in.
pub struct StepCreateResourceGroup {
    resource_groups: Arc<dyn ResourceGroupOps>,
    ui: Arc<dyn Ui>,
}

impl StepCreateResourceGroup {
    /// Creates the step.
    pub fn new(resource_groups: Arc<dyn ResourceGroupOps>, ui: Arc<dyn Ui>) -> Self {
        Self { resource_groups, ui }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        let name = state.require_string(keys::RESOURCE_GROUP_NAME)?;

        if state.flag(keys::IS_EXISTING_RESOURCE_GROUP) {
            self.ui.say(&format!("Using existing resource group '{name}'"));
            if !self.resource_groups.resource_group_exists(&name).await? {
                return Err(BuildError::configuration(format!(
                    "build resource group '{name}' does not exist"
                )));
            }
            return Ok(());
        }

        let location = state.require_string(keys::LOCATION)?;
        let tags: HashMap<String, String> = state.get_as(keys::TAGS)?.unwrap_or_default();

        // Teardown deletes whatever carries this name, so it must be new.
        if self.resource_groups.resource_group_exists(&name).await? {
            return Err(BuildError::configuration(format!(
                "resource group '{name}' already exists"
            )));
        }

        self.ui
            .say(&format!("Creating resource group '{name}' in '{location}'"));
        // Recorded before the call: a failed create can still leave the group behind.
        state.put(keys::RESOURCE_GROUP_CREATED, json!(true));
        self.resource_groups
            .create_resource_group(&name, &location, &tags, &ctx.cancel)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for StepCreateResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCreateResourceGroup").finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepCreateResourceGroup {
    fn name(&self) -> &str {
        "create_resource_group"
    }

    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction {
        finish(self.ui.as_ref(), self.execute(ctx, state).await)
    }

    async fn cleanup(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        if !state.flag(keys::RESOURCE_GROUP_CREATED) {
            return Ok(());
        }
        let name = state.require_string(keys::RESOURCE_GROUP_NAME)?;

        if !self.resource_groups.resource_group_exists(&name).await? {
            info!(resource_group = %name, "Temporary resource group already gone");
            return Ok(());
        }

        let wait = !state.flag(keys::ASYNC_RESOURCE_GROUP_DELETE);
        self.ui.say(&format!("Deleting resource group '{name}'"));
        if let Err(err) = self
            .resource_groups
            .delete_resource_group(&name, wait, &ctx.cancel)
            .await
        {
            warn!(resource_group = %name, error = %err, "Failed to delete temporary resource group");
            self.ui.error(&format!(
                "Error deleting resource group '{name}'. Please delete it manually.\n\nError: {err}"
            ));
            return Err(err.into());
        }
        if !wait {
            self.ui.say(&format!(
                "Resource group '{name}' is being deleted in the background; \
                 it may take a while for its resources to disappear"
            ));
        }
        Ok(())
    }
}
