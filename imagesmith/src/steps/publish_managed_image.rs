//! Publishes the generalized VM as a managed image.

use super::{finish, BuildContext, Step, StepAction};
use crate::cloud::{managed_image_id, ImageOps, ImageParameters};
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Creates the managed image. Only runs for managed-image builds.
///
/// The image is the build's output, so there is nothing to clean up.
pub struct StepPublishToManagedImage {
    images: Arc<dyn ImageOps>,
    ui: Arc<dyn Ui>,
}

impl StepPublishToManagedImage {
    /// Creates the step.
    pub fn new(images: Arc<dyn ImageOps>, ui: Arc<dyn Ui>) -> Self {
        Self { images, ui }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        if !state.flag(keys::IS_MANAGED_IMAGE) {
            return Ok(());
        }
        let parameters: ImageParameters = state.require(keys::IMAGE_PARAMETERS)?;
        let subscription = state.require_string(keys::MANAGED_IMAGE_SUBSCRIPTION)?;
        let resource_group = state.require_string(keys::MANAGED_IMAGE_RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::MANAGED_IMAGE_NAME)?;

        self.ui.say(&format!(
            "Creating managed image '{name}' in resource group '{resource_group}'"
        ));
        let id = self
            .images
            .create_managed_image(&resource_group, &name, &parameters, &ctx.cancel)
            .await?
            .unwrap_or_else(|| managed_image_id(&subscription, &resource_group, &name));
        self.ui.say(&format!("Managed image id: {id}"));
        state.put(keys::MANAGED_IMAGE_ID, json!(id));
        Ok(())
    }
}

impl std::fmt::Debug for StepPublishToManagedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepPublishToManagedImage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepPublishToManagedImage {
    fn name(&self) -> &str {
        "publish_managed_image"
    }

    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction {
        finish(self.ui.as_ref(), self.execute(ctx, state).await)
    }
}
