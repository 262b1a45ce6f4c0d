//! The provider capability consumed by the facade.
//!
//! Implementations own authentication and the wire format. Mutating calls
//! return immediately with an [`Operation`] handle; the facade decides how long
//! to wait on it.

use super::poller::Operation;
use super::types::{ImageParameters, ImageVersionId, PowerState, PublishArgs, VmSpec};
use crate::errors::CloudError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Raw provider operations.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Checks whether a resource group exists.
    async fn resource_group_exists(&self, name: &str) -> Result<bool, CloudError>;

    /// Starts creating a resource group.
    async fn begin_create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Operation, CloudError>;

    /// Starts deleting a resource group and everything in it.
    async fn begin_delete_resource_group(&self, name: &str) -> Result<Operation, CloudError>;

    /// Starts creating a virtual machine.
    async fn begin_create_vm(&self, spec: &VmSpec) -> Result<Operation, CloudError>;

    /// Reads the power state of a virtual machine.
    async fn vm_power_state(&self, resource_group: &str, name: &str) -> Result<PowerState, CloudError>;

    /// Starts powering off (deallocating) a virtual machine.
    async fn begin_power_off_vm(&self, resource_group: &str, name: &str) -> Result<Operation, CloudError>;

    /// Marks a stopped virtual machine as generalized.
    async fn generalize_vm(&self, resource_group: &str, name: &str) -> Result<(), CloudError>;

    /// Starts deleting a virtual machine.
    async fn begin_delete_vm(&self, resource_group: &str, name: &str) -> Result<Operation, CloudError>;

    /// Starts deleting a managed disk.
    async fn begin_delete_disk(&self, resource_group: &str, name: &str) -> Result<Operation, CloudError>;

    /// Starts creating a managed image from a generalized VM.
    async fn begin_create_image(
        &self,
        resource_group: &str,
        name: &str,
        parameters: &ImageParameters,
    ) -> Result<Operation, CloudError>;

    /// Starts capturing a generalized VM's OS disk into a storage container.
    async fn begin_capture_vhd(
        &self,
        resource_group: &str,
        vm_name: &str,
        container_name: &str,
        name_prefix: &str,
    ) -> Result<Operation, CloudError>;

    /// Checks whether a gallery image version exists.
    async fn gallery_image_version_exists(&self, id: &ImageVersionId) -> Result<bool, CloudError>;

    /// Starts creating a gallery image version.
    async fn begin_create_gallery_image_version(
        &self,
        args: &PublishArgs,
    ) -> Result<Operation, CloudError>;

    /// Starts deleting a gallery image version.
    async fn begin_delete_gallery_image_version(
        &self,
        id: &ImageVersionId,
    ) -> Result<Operation, CloudError>;
}
