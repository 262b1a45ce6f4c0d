//! Cloud client facade.
//!
//! Steps depend on the narrow operation groups defined here rather than on the
//! provider directly. Every mutating call blocks until the remote operation
//! reaches a terminal state, its deadline passes, or the token fires.

mod api;
mod client;
pub mod poller;
pub mod types;

pub use api::CloudApi;
pub use client::CloudClient;
pub use poller::{cancellable, LongRunningOperation, Operation, OperationStatus, PollOptions};
pub use types::{
    managed_image_id, virtual_machine_id, ImageParameters, ImageVersionId, PowerState,
    PublishArgs, ReplicationMode, SharedImageGalleryDestination, VmSpec,
};

use crate::cancellation::CancellationToken;
use crate::errors::CloudError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resource group lifecycle.
#[async_trait]
pub trait ResourceGroupOps: Send + Sync {
    /// Checks whether a resource group exists.
    async fn resource_group_exists(&self, name: &str) -> Result<bool, CloudError>;

    /// Creates a resource group and waits for it.
    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;

    /// Deletes a resource group. With `wait == false` the call returns once
    /// the deletion has been accepted.
    async fn delete_resource_group(
        &self,
        name: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;
}

/// Virtual machine lifecycle.
#[async_trait]
pub trait VirtualMachineOps: Send + Sync {
    /// Creates the VM and returns its resource id when the provider reports one.
    async fn create_vm(
        &self,
        spec: &VmSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CloudError>;

    /// Waits for the VM to report `running`.
    async fn wait_until_running(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;

    /// Powers off (deallocates) the VM.
    async fn power_off_vm(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;

    /// Marks the VM as generalized.
    async fn generalize_vm(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    /// Deletes the VM.
    async fn delete_vm(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;

    /// Deletes a managed disk.
    async fn delete_disk(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;
}

/// Disk and image capture.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Creates a managed image and returns its resource id when reported.
    async fn create_managed_image(
        &self,
        resource_group: &str,
        name: &str,
        parameters: &ImageParameters,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CloudError>;

    /// Captures the VM's OS disk and returns the blob URI.
    async fn capture_vhd(
        &self,
        resource_group: &str,
        vm_name: &str,
        container_name: &str,
        name_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CloudError>;
}

/// Gallery image version lifecycle.
///
/// Publishing is split in two so callers can tell a request the provider
/// refused (nothing was created) from one it accepted and later failed.
#[async_trait]
pub trait GalleryOps: Send + Sync {
    /// Checks whether a version exists.
    async fn image_version_exists(&self, id: &ImageVersionId) -> Result<bool, CloudError>;

    /// Submits a publish request. `Ok` means the provider accepted it.
    async fn begin_publish_image_version(
        &self,
        args: &PublishArgs,
        cancel: &CancellationToken,
    ) -> Result<Operation, CloudError>;

    /// Waits for an accepted publish and returns the version's resource id.
    async fn wait_for_publish(
        &self,
        op: Operation,
        args: &PublishArgs,
        cancel: &CancellationToken,
    ) -> Result<String, CloudError>;

    /// Publishes a version and returns its resource id.
    async fn publish_image_version(
        &self,
        args: &PublishArgs,
        cancel: &CancellationToken,
    ) -> Result<String, CloudError> {
        let op = self.begin_publish_image_version(args, cancel).await?;
        self.wait_for_publish(op, args, cancel).await
    }

    /// Deletes a version. A missing version surfaces as `CloudError::NotFound`.
    async fn delete_image_version(
        &self,
        id: &ImageVersionId,
        cancel: &CancellationToken,
    ) -> Result<(), CloudError>;
}

/// Every operation group a full build needs.
pub trait CloudOps: ResourceGroupOps + VirtualMachineOps + ImageOps + GalleryOps {}

impl<T> CloudOps for T where T: ResourceGroupOps + VirtualMachineOps + ImageOps + GalleryOps {}
