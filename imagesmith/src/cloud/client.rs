//! The "start and wait" facade over a [`CloudApi`].

use super::api::CloudApi;
use super::poller::{cancellable, poll_until, wait_for_completion, Operation, PollOptions, Probe};
use super::types::{ImageParameters, ImageVersionId, PowerState, PublishArgs, VmSpec};
use super::{GalleryOps, ImageOps, ResourceGroupOps, VirtualMachineOps};
use crate::cancellation::CancellationToken;
use crate::config::Timeouts;
use crate::errors::CloudError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Cloud facade that turns provider operations into blocking calls.
///
/// Each operation class waits against its own deadline from [`Timeouts`];
/// all of them share the polling interval.
#[derive(Clone)]
pub struct CloudClient {
    api: Arc<dyn CloudApi>,
    timeouts: Timeouts,
}

impl CloudClient {
    /// Creates a client over a provider.
    pub fn new(api: Arc<dyn CloudApi>, timeouts: Timeouts) -> Self {
        Self { api, timeouts }
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    fn options(&self, timeout: Duration) -> PollOptions {
        PollOptions::new(self.timeouts.polling_interval(), timeout)
    }
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceGroupOps for CloudClient {
    async fn resource_group_exists(&self, name: &str) -> Result<bool, CloudError> {
        self.api.resource_group_exists(name).await
    }

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let op = cancellable(
            "resource_groups.create",
            cancel,
            self.api.begin_create_resource_group(name, location, tags),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.vm_timeout()), cancel).await?;
        Ok(())
    }

    async fn delete_resource_group(
        &self,
        name: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let op = cancellable(
            "resource_groups.delete",
            cancel,
            self.api.begin_delete_resource_group(name),
        )
        .await?;
        if !wait {
            info!(resource_group = %name, "Resource group deletion started, not waiting");
            return Ok(());
        }
        wait_for_completion(op.as_ref(), self.options(self.timeouts.delete_timeout()), cancel)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VirtualMachineOps for CloudClient {
    async fn create_vm(
        &self,
        spec: &VmSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CloudError> {
        let op = cancellable(
            "virtual_machines.create",
            cancel,
            self.api.begin_create_vm(spec),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.vm_timeout()), cancel).await
    }

    async fn wait_until_running(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let api = &self.api;
        poll_until(
            "virtual_machines.instance_view",
            self.options(self.timeouts.vm_timeout()),
            cancel,
            || async move {
                let state = api.vm_power_state(resource_group, name).await?;
                debug!(vm = %name, power_state = %state, "Polled VM power state");
                match state {
                    PowerState::Running => Ok(Probe::Ready(())),
                    PowerState::Stopped | PowerState::Deallocated => Err(CloudError::remote(
                        "virtual_machines.instance_view",
                        "VMNotRunning",
                        format!("{name} is {state} while waiting for it to start"),
                    )),
                    PowerState::Starting | PowerState::Stopping | PowerState::Unknown => {
                        Ok(Probe::Pending)
                    }
                }
            },
        )
        .await
    }

    async fn power_off_vm(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let op = cancellable(
            "virtual_machines.power_off",
            cancel,
            self.api.begin_power_off_vm(resource_group, name),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.vm_timeout()), cancel).await?;
        Ok(())
    }

    async fn generalize_vm(&self, resource_group: &str, name: &str) -> Result<(), CloudError> {
        self.api.generalize_vm(resource_group, name).await
    }

    async fn delete_vm(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let op = cancellable(
            "virtual_machines.delete",
            cancel,
            self.api.begin_delete_vm(resource_group, name),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.delete_timeout()), cancel)
            .await?;
        Ok(())
    }

    async fn delete_disk(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let op = cancellable(
            "disks.delete",
            cancel,
            self.api.begin_delete_disk(resource_group, name),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.delete_timeout()), cancel)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ImageOps for CloudClient {
    async fn create_managed_image(
        &self,
        resource_group: &str,
        name: &str,
        parameters: &ImageParameters,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CloudError> {
        let op = cancellable(
            "images.create",
            cancel,
            self.api.begin_create_image(resource_group, name, parameters),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.capture_timeout()), cancel)
            .await
    }

    async fn capture_vhd(
        &self,
        resource_group: &str,
        vm_name: &str,
        container_name: &str,
        name_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CloudError> {
        let op = cancellable(
            "virtual_machines.capture",
            cancel,
            self.api
                .begin_capture_vhd(resource_group, vm_name, container_name, name_prefix),
        )
        .await?;
        let description = op.description().to_string();
        wait_for_completion(op.as_ref(), self.options(self.timeouts.capture_timeout()), cancel)
            .await?
            .ok_or_else(|| {
                CloudError::remote(description, "MissingResult", "capture completed without a blob uri")
            })
    }
}

#[async_trait]
impl GalleryOps for CloudClient {
    async fn image_version_exists(&self, id: &ImageVersionId) -> Result<bool, CloudError> {
        self.api.gallery_image_version_exists(id).await
    }

    async fn begin_publish_image_version(
        &self,
        args: &PublishArgs,
        cancel: &CancellationToken,
    ) -> Result<Operation, CloudError> {
        cancellable(
            "gallery_image_versions.create",
            cancel,
            self.api.begin_create_gallery_image_version(args),
        )
        .await
    }

    async fn wait_for_publish(
        &self,
        op: Operation,
        args: &PublishArgs,
        cancel: &CancellationToken,
    ) -> Result<String, CloudError> {
        let id = wait_for_completion(op.as_ref(), self.options(self.timeouts.gallery_timeout()), cancel)
            .await?;
        Ok(id.unwrap_or_else(|| args.version_id().resource_id()))
    }

    async fn delete_image_version(
        &self,
        id: &ImageVersionId,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError> {
        let op = cancellable(
            "gallery_image_versions.delete",
            cancel,
            self.api.begin_delete_gallery_image_version(id),
        )
        .await?;
        wait_for_completion(op.as_ref(), self.options(self.timeouts.gallery_timeout()), cancel)
            .await?;
        Ok(())
    }
}
