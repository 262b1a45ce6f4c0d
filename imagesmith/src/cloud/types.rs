//! Request and identity types exchanged with the cloud facade.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Renders the resource id of a managed image.
#[must_use]
pub fn managed_image_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Compute/images/{name}"
    )
}

/// Renders the resource id of a virtual machine.
#[must_use]
pub fn virtual_machine_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/{name}"
    )
}

/// Everything needed to create the build VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Resource group of the VM.
    pub resource_group: String,
    /// VM name.
    pub name: String,
    /// Region.
    pub location: String,
    /// VM size.
    pub size: String,
    /// Source image reference.
    pub source_image: String,
    /// Name of the OS disk.
    pub os_disk_name: String,
    /// Tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Power state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    /// Booting.
    Starting,
    /// Running and reachable.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped but still allocated.
    Stopped,
    /// Stopped and released.
    Deallocated,
    /// Reported state was not recognised.
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deallocated => "deallocated",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Parameters of a generalized image, written once the VM is de-provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParameters {
    /// Region of the source VM.
    pub location: String,
    /// Resource id of the generalized source VM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_virtual_machine_id: Option<String>,
    /// Tags for the resulting image.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// How a gallery image version is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// Every replica is fully materialised before the publish completes.
    #[default]
    Full,
    /// Replicas are created lazily; publish completes faster.
    Shallow,
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("Full"),
            Self::Shallow => f.write_str("Shallow"),
        }
    }
}

/// Where in a shared image gallery a version is published.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharedImageGalleryDestination {
    /// Gallery name.
    pub gallery_name: String,
    /// Image definition name.
    pub image_name: String,
    /// Version to create.
    pub image_version: String,
    /// Subscription of the gallery.
    pub subscription: String,
    /// Resource group of the gallery.
    pub resource_group: String,
    /// Replication regions, in configured order.
    pub replication_regions: Vec<String>,
    /// Storage account type of the replicas.
    pub storage_account_type: String,
    /// Exclude the version from "latest" resolution.
    #[serde(default)]
    pub exclude_from_latest: bool,
    /// End-of-life date of the version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_life_date: Option<String>,
}

/// One gallery publish request. Built fresh per publish and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishArgs {
    /// Subscription the request is issued against.
    pub subscription_id: String,
    /// Resource id of the managed image or VM being published.
    pub source_id: String,
    /// Region of the source.
    pub location: String,
    /// Replicas per region.
    pub replica_count: u32,
    /// Replication mode.
    pub replication_mode: ReplicationMode,
    /// Tags of the version.
    pub tags: HashMap<String, String>,
    /// Destination in the gallery.
    pub shared_image_gallery: SharedImageGalleryDestination,
}

impl PublishArgs {
    /// Identity of the version this request creates.
    #[must_use]
    pub fn version_id(&self) -> ImageVersionId {
        let dest = &self.shared_image_gallery;
        ImageVersionId {
            subscription_id: dest.subscription.clone(),
            resource_group: dest.resource_group.clone(),
            gallery_name: dest.gallery_name.clone(),
            image_name: dest.image_name.clone(),
            version: dest.image_version.clone(),
        }
    }
}

/// Composite identity of a gallery image version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageVersionId {
    /// Subscription of the gallery.
    pub subscription_id: String,
    /// Resource group of the gallery.
    pub resource_group: String,
    /// Gallery name.
    pub gallery_name: String,
    /// Image definition name.
    pub image_name: String,
    /// Version string.
    pub version: String,
}

impl ImageVersionId {
    /// Renders the resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/galleries/{}/images/{}/versions/{}",
            self.subscription_id, self.resource_group, self.gallery_name, self.image_name, self.version
        )
    }
}

impl fmt::Display for ImageVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{} (gallery {})",
            self.resource_group, self.image_name, self.version, self.gallery_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> PublishArgs {
        PublishArgs {
            subscription_id: "sub".into(),
            source_id: "vm-1".into(),
            location: "L".into(),
            replica_count: 1,
            replication_mode: ReplicationMode::Full,
            tags: HashMap::new(),
            shared_image_gallery: SharedImageGalleryDestination {
                gallery_name: "g".into(),
                image_name: "img".into(),
                image_version: "1.0.0".into(),
                subscription: "dest-sub".into(),
                resource_group: "rg".into(),
                replication_regions: vec!["A".into(), "B".into()],
                storage_account_type: "Standard_LRS".into(),
                exclude_from_latest: false,
                end_of_life_date: None,
            },
        }
    }

    #[test]
    fn test_version_id_uses_destination_subscription() {
        let id = args().version_id();
        assert_eq!(
            id.resource_id(),
            "/subscriptions/dest-sub/resourceGroups/rg/providers/Microsoft.Compute/galleries/g/images/img/versions/1.0.0"
        );
    }

    #[test]
    fn test_replication_mode_wire_names() {
        assert_eq!(ReplicationMode::Full.to_string(), "Full");
        assert_eq!(ReplicationMode::Shallow.to_string(), "Shallow");
        assert_eq!(serde_json::to_string(&ReplicationMode::Shallow).unwrap(), "\"Shallow\"");
    }

    #[test]
    fn test_managed_image_id() {
        assert_eq!(
            managed_image_id("s", "rg", "img"),
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/images/img"
        );
    }
}
