//! In-memory cloud provider.

use crate::cloud::{
    CloudApi, ImageParameters, ImageVersionId, LongRunningOperation, Operation, OperationStatus,
    PowerState, PublishArgs, VmSpec,
};
use crate::errors::CloudError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

/// Operation names the fake reports and accepts in failure scripts.
pub mod ops {
    /// Resource group creation.
    pub const CREATE_RESOURCE_GROUP: &str = "resource_groups.create";
    /// Resource group deletion.
    pub const DELETE_RESOURCE_GROUP: &str = "resource_groups.delete";
    /// VM creation.
    pub const CREATE_VM: &str = "virtual_machines.create";
    /// VM power off.
    pub const POWER_OFF_VM: &str = "virtual_machines.power_off";
    /// VM generalization.
    pub const GENERALIZE_VM: &str = "virtual_machines.generalize";
    /// VM deletion.
    pub const DELETE_VM: &str = "virtual_machines.delete";
    /// OS disk deletion.
    pub const DELETE_DISK: &str = "disks.delete";
    /// Managed image creation.
    pub const CREATE_IMAGE: &str = "images.create";
    /// VHD capture.
    pub const CAPTURE_VHD: &str = "virtual_machines.capture";
    /// Gallery image version creation.
    pub const CREATE_GALLERY_IMAGE_VERSION: &str = "gallery_image_versions.create";
    /// Gallery image version deletion.
    pub const DELETE_GALLERY_IMAGE_VERSION: &str = "gallery_image_versions.delete";
}

/// One mutating call received by [`FakeCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCloudCall {
    /// `resource_group_exists(name)`.
    ResourceGroupExists(String),
    /// `begin_create_resource_group(name, ..)`.
    CreateResourceGroup(String),
    /// `begin_delete_resource_group(name)`.
    DeleteResourceGroup(String),
    /// `begin_create_vm` for the named VM.
    CreateVm(String),
    /// `begin_power_off_vm` for the named VM.
    PowerOffVm(String),
    /// `generalize_vm` for the named VM.
    GeneralizeVm(String),
    /// `begin_delete_vm` for the named VM.
    DeleteVm(String),
    /// `begin_delete_disk` for the named disk.
    DeleteDisk(String),
    /// `begin_create_image` for the named image.
    CreateImage(String),
    /// `begin_capture_vhd` for the named VM.
    CaptureVhd(String),
    /// `gallery_image_version_exists(id)`.
    GalleryImageVersionExists(ImageVersionId),
    /// `begin_create_gallery_image_version` with its exact arguments.
    CreateGalleryImageVersion(PublishArgs),
    /// `begin_delete_gallery_image_version` for the version.
    DeleteGalleryImageVersion(ImageVersionId),
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<FakeCloudCall>,
    resource_groups: HashSet<String>,
    vms: HashSet<String>,
    disks: HashSet<String>,
    image_versions: HashSet<ImageVersionId>,
    begin_failures: HashMap<String, CloudError>,
    operation_failures: HashMap<String, (String, String, Option<String>)>,
    hanging: HashSet<String>,
    stalled: HashSet<String>,
}

/// A deterministic [`CloudApi`] that keeps resources in memory.
///
/// Every operation succeeds after `polls_to_complete` polls unless it was
/// scripted to fail or hang. Deleting something that does not exist fails
/// with `CloudError::NotFound`, as the real provider does.
#[derive(Debug)]
pub struct FakeCloud {
    inner: Mutex<Inner>,
    polls_to_complete: u32,
    boot_polls: u32,
    hang_all: bool,
    power_state_polls: AtomicU32,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    /// Creates an empty fake whose operations finish on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            polls_to_complete: 1,
            boot_polls: 1,
            hang_all: false,
            power_state_polls: AtomicU32::new(0),
        }
    }

    /// Operations report success on the `polls`-th poll.
    #[must_use]
    pub fn with_polls_to_complete(mut self, polls: u32) -> Self {
        self.polls_to_complete = polls.max(1);
        self
    }

    /// VMs report `running` on the `polls`-th power state read.
    #[must_use]
    pub fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls.max(1);
        self
    }

    /// Every operation stays in progress forever.
    #[must_use]
    pub fn with_hanging_operations(mut self) -> Self {
        self.hang_all = true;
        self
    }

    /// Pre-creates a resource group.
    #[must_use]
    pub fn with_resource_group(self, name: impl Into<String>) -> Self {
        self.inner.lock().resource_groups.insert(name.into());
        self
    }

    /// Pre-creates a gallery image version.
    #[must_use]
    pub fn with_image_version(self, id: ImageVersionId) -> Self {
        self.inner.lock().image_versions.insert(id);
        self
    }

    /// Makes the `begin_*` call for `operation` fail with `error`.
    pub fn fail_begin(&self, operation: &str, error: CloudError) {
        self.inner
            .lock()
            .begin_failures
            .insert(operation.to_string(), error);
    }

    /// Makes `operation` end in a `Failed` status.
    pub fn fail_operation(
        &self,
        operation: &str,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) {
        self.inner.lock().operation_failures.insert(
            operation.to_string(),
            (code.into(), message.into(), details),
        );
    }

    /// Makes `operation` stay in progress forever.
    pub fn hang(&self, operation: &str) {
        self.inner.lock().hanging.insert(operation.to_string());
    }

    /// Makes the `begin_*` call for `operation` never return.
    pub fn stall_begin(&self, operation: &str) {
        self.inner.lock().stalled.insert(operation.to_string());
    }

    /// Returns every mutating call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCloudCall> {
        self.inner.lock().calls.clone()
    }

    /// Returns the number of power state reads.
    #[must_use]
    pub fn power_state_polls(&self) -> u32 {
        self.power_state_polls.load(Ordering::SeqCst)
    }

    /// Returns true if the resource group exists.
    #[must_use]
    pub fn has_resource_group(&self, name: &str) -> bool {
        self.inner.lock().resource_groups.contains(name)
    }

    /// Returns true if the VM exists.
    #[must_use]
    pub fn has_vm(&self, name: &str) -> bool {
        self.inner.lock().vms.contains(name)
    }

    /// Returns true if the gallery image version exists.
    #[must_use]
    pub fn has_image_version(&self, id: &ImageVersionId) -> bool {
        self.inner.lock().image_versions.contains(id)
    }

    /// Records `call`, applies any scripted begin failure, and runs `mutate`
    /// against the resource sets. The returned operation honours scripted
    /// operation failures and hangs. A stalled begin never returns and
    /// records nothing.
    async fn begin(
        &self,
        operation: &str,
        call: FakeCloudCall,
        resource_id: Option<String>,
        mutate: impl FnOnce(&mut Inner) -> Result<(), CloudError>,
    ) -> Result<Operation, CloudError> {
        let stalled = self.inner.lock().stalled.contains(operation);
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock();
        inner.calls.push(call);
        if let Some(err) = inner.begin_failures.get(operation) {
            return Err(err.clone());
        }

        let terminal = match inner.operation_failures.get(operation) {
            Some((code, message, details)) => OperationStatus::Failed {
                code: code.clone(),
                message: message.clone(),
                details: details.clone(),
            },
            None => {
                mutate(&mut *inner)?;
                OperationStatus::Succeeded { resource_id }
            }
        };
        let hanging = self.hang_all || inner.hanging.contains(operation);

        Ok(Box::new(FakeOperation {
            description: operation.to_string(),
            terminal,
            hanging,
            polls_to_complete: self.polls_to_complete,
            polls: AtomicU32::new(0),
        }))
    }
}

struct FakeOperation {
    description: String,
    terminal: OperationStatus,
    hanging: bool,
    polls_to_complete: u32,
    polls: AtomicU32,
}

#[async_trait]
impl LongRunningOperation for FakeOperation {
    fn description(&self) -> &str {
        &self.description
    }

    async fn poll(&self) -> Result<OperationStatus, CloudError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hanging || polls < self.polls_to_complete {
            return Ok(OperationStatus::InProgress);
        }
        Ok(self.terminal.clone())
    }
}

fn remove_or_not_found(set: &mut HashSet<String>, name: &str) -> Result<(), CloudError> {
    if set.remove(name) {
        Ok(())
    } else {
        Err(CloudError::not_found(name))
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn resource_group_exists(&self, name: &str) -> Result<bool, CloudError> {
        let mut inner = self.inner.lock();
        inner
            .calls
            .push(FakeCloudCall::ResourceGroupExists(name.to_string()));
        Ok(inner.resource_groups.contains(name))
    }

    async fn begin_create_resource_group(
        &self,
        name: &str,
        _location: &str,
        _tags: &HashMap<String, String>,
    ) -> Result<Operation, CloudError> {
        self.begin(
            ops::CREATE_RESOURCE_GROUP,
            FakeCloudCall::CreateResourceGroup(name.to_string()),
            None,
            |inner| {
                inner.resource_groups.insert(name.to_string());
                Ok(())
            },
        )
        .await
    }

    async fn begin_delete_resource_group(&self, name: &str) -> Result<Operation, CloudError> {
        self.begin(
            ops::DELETE_RESOURCE_GROUP,
            FakeCloudCall::DeleteResourceGroup(name.to_string()),
            None,
            |inner| remove_or_not_found(&mut inner.resource_groups, name),
        )
        .await
    }

    async fn begin_create_vm(&self, spec: &VmSpec) -> Result<Operation, CloudError> {
        self.begin(
            ops::CREATE_VM,
            FakeCloudCall::CreateVm(spec.name.clone()),
            None,
            |inner| {
                inner.vms.insert(spec.name.clone());
                inner.disks.insert(spec.os_disk_name.clone());
                Ok(())
            },
        )
        .await
    }

    async fn vm_power_state(&self, _resource_group: &str, name: &str) -> Result<PowerState, CloudError> {
        if !self.has_vm(name) {
            return Err(CloudError::not_found(name));
        }
        let polls = self.power_state_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls >= self.boot_polls {
            Ok(PowerState::Running)
        } else {
            Ok(PowerState::Starting)
        }
    }

    async fn begin_power_off_vm(&self, _resource_group: &str, name: &str) -> Result<Operation, CloudError> {
        self.begin(
            ops::POWER_OFF_VM,
            FakeCloudCall::PowerOffVm(name.to_string()),
            None,
            |_| Ok(()),
        )
        .await
    }

    async fn generalize_vm(&self, _resource_group: &str, name: &str) -> Result<(), CloudError> {
        let mut inner = self.inner.lock();
        inner.calls.push(FakeCloudCall::GeneralizeVm(name.to_string()));
        match inner.begin_failures.get(ops::GENERALIZE_VM) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn begin_delete_vm(&self, _resource_group: &str, name: &str) -> Result<Operation, CloudError> {
        self.begin(
            ops::DELETE_VM,
            FakeCloudCall::DeleteVm(name.to_string()),
            None,
            |inner| remove_or_not_found(&mut inner.vms, name),
        )
        .await
    }

    async fn begin_delete_disk(&self, _resource_group: &str, name: &str) -> Result<Operation, CloudError> {
        self.begin(
            ops::DELETE_DISK,
            FakeCloudCall::DeleteDisk(name.to_string()),
            None,
            |inner| remove_or_not_found(&mut inner.disks, name),
        )
        .await
    }

    async fn begin_create_image(
        &self,
        _resource_group: &str,
        name: &str,
        _parameters: &ImageParameters,
    ) -> Result<Operation, CloudError> {
        self.begin(
            ops::CREATE_IMAGE,
            FakeCloudCall::CreateImage(name.to_string()),
            None,
            |_| Ok(()),
        )
        .await
    }

    async fn begin_capture_vhd(
        &self,
        _resource_group: &str,
        vm_name: &str,
        container_name: &str,
        name_prefix: &str,
    ) -> Result<Operation, CloudError> {
        let uri = format!(
            "https://fakestorage.blob.core.windows.net/system/Microsoft.Compute/Images/{container_name}/{name_prefix}-osDisk.vhd"
        );
        self.begin(
            ops::CAPTURE_VHD,
            FakeCloudCall::CaptureVhd(vm_name.to_string()),
            Some(uri),
            |_| Ok(()),
        )
        .await
    }

    async fn gallery_image_version_exists(&self, id: &ImageVersionId) -> Result<bool, CloudError> {
        let mut inner = self.inner.lock();
        inner
            .calls
            .push(FakeCloudCall::GalleryImageVersionExists(id.clone()));
        Ok(inner.image_versions.contains(id))
    }

    async fn begin_create_gallery_image_version(
        &self,
        args: &PublishArgs,
    ) -> Result<Operation, CloudError> {
        let id = args.version_id();
        self.begin(
            ops::CREATE_GALLERY_IMAGE_VERSION,
            FakeCloudCall::CreateGalleryImageVersion(args.clone()),
            None,
            |inner| {
                inner.image_versions.insert(id);
                Ok(())
            },
        )
        .await
    }

    async fn begin_delete_gallery_image_version(
        &self,
        id: &ImageVersionId,
    ) -> Result<Operation, CloudError> {
        self.begin(
            ops::DELETE_GALLERY_IMAGE_VERSION,
            FakeCloudCall::DeleteGalleryImageVersion(id.clone()),
            None,
            |inner| {
                if inner.image_versions.remove(id) {
                    Ok(())
                } else {
                    Err(CloudError::not_found(id.to_string()))
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_missing_version_is_not_found() {
        let fake = FakeCloud::new();
        let id = ImageVersionId {
            subscription_id: "s".into(),
            resource_group: "rg".into(),
            gallery_name: "g".into(),
            image_name: "img".into(),
            version: "1.0.0".into(),
        };

        let err = fake.begin_delete_gallery_image_version(&id).await.err().unwrap();

        assert!(err.is_not_found());
        assert_eq!(fake.calls(), vec![FakeCloudCall::DeleteGalleryImageVersion(id)]);
    }

    #[tokio::test]
    async fn test_scripted_operation_failure() {
        let fake = FakeCloud::new().with_polls_to_complete(2);
        fake.fail_operation(ops::CREATE_RESOURCE_GROUP, "Conflict", "busy", None);

        let op = fake
            .begin_create_resource_group("rg", "L", &HashMap::new())
            .await
            .unwrap();

        assert_eq!(op.poll().await.unwrap(), OperationStatus::InProgress);
        assert!(matches!(op.poll().await.unwrap(), OperationStatus::Failed { .. }));
        assert!(!fake.has_resource_group("rg"));
    }
}
