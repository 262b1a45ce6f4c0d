//! Resolved build configuration.
//!
//! The configuration arrives fully resolved (templating and credential flows
//! happen elsewhere). This module validates it, fills in generated names for
//! temporary resources, and seeds the build state every step reads from.

mod naming;
mod timeouts;

pub use naming::{os_disk_name, random_suffix, temp_compute_name, temp_resource_group_name};
pub use timeouts::{Timeouts, MAX_TIMEOUT_SECONDS};

use crate::errors::BuildError;
use crate::state::{keys, StateBag};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Maximum replica count the gallery service accepts per region.
pub const MAX_REPLICA_COUNT: u32 = 100;

static IMAGE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Output as a managed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedImageOutput {
    /// Resource group of the managed image.
    pub resource_group_name: String,
    /// Name of the managed image.
    pub name: String,
    /// Subscription override; defaults to the build subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

/// Output as a VHD blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhdCapture {
    /// Storage container receiving the VHD.
    pub container_name: String,
    /// Blob name prefix.
    pub name_prefix: String,
}

/// Publication into a shared image gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryDestination {
    /// Subscription of the gallery; defaults to the build subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Resource group of the gallery.
    pub resource_group: String,
    /// Gallery name.
    pub gallery_name: String,
    /// Image definition name.
    pub image_name: String,
    /// Version to create, `MAJOR.MINOR.PATCH`.
    pub image_version: String,
    /// Replication regions, passed on in order and without deduplication.
    #[serde(default)]
    pub replication_regions: Vec<String>,
    /// Storage account type of the replicas.
    #[serde(default = "default_storage_account_type")]
    pub storage_account_type: String,
    /// Replica count override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<u32>,
    /// Publish with shallow replication.
    #[serde(default)]
    pub shallow_replication: bool,
    /// Exclude the version from "latest" resolution.
    #[serde(default)]
    pub exclude_from_latest: bool,
    /// End-of-life date of the version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_life_date: Option<String>,
}

fn default_storage_account_type() -> String {
    "Standard_LRS".to_string()
}

fn default_vm_size() -> String {
    "Standard_A1".to_string()
}

/// A fully resolved build configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Subscription the build runs in.
    pub subscription_id: String,
    /// Region of the build resources.
    pub location: String,
    /// Source image reference of the build VM.
    pub source_image: String,
    /// VM size.
    #[serde(default = "default_vm_size")]
    pub vm_size: String,
    /// Existing resource group to build in. Never deleted by the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_resource_group_name: Option<String>,
    /// Name of the temporary resource group; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_resource_group_name: Option<String>,
    /// Name of the build VM; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_compute_name: Option<String>,
    /// Managed image output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_image: Option<ManagedImageOutput>,
    /// VHD output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<VhdCapture>,
    /// Gallery publication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_image_gallery_destination: Option<GalleryDestination>,
    /// Tags applied to created resources.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Delete the temporary resource group without waiting for completion.
    #[serde(default)]
    pub async_resourcegroup_delete: bool,
    /// Operation deadlines.
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl BuildConfig {
    /// Creates a configuration with only the required identity set.
    #[must_use]
    pub fn new(
        subscription_id: impl Into<String>,
        location: impl Into<String>,
        source_image: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            location: location.into(),
            source_image: source_image.into(),
            vm_size: default_vm_size(),
            build_resource_group_name: None,
            temp_resource_group_name: None,
            temp_compute_name: None,
            managed_image: None,
            capture: None,
            shared_image_gallery_destination: None,
            tags: HashMap::new(),
            async_resourcegroup_delete: false,
            timeouts: Timeouts::default(),
        }
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Configuration` if the document does not match the schema.
    pub fn from_json_str(raw: &str) -> Result<Self, BuildError> {
        serde_json::from_str(raw)
            .map_err(|e| BuildError::configuration(format!("invalid build configuration: {e}")))
    }

    /// Sets the managed image output.
    #[must_use]
    pub fn with_managed_image(
        mut self,
        resource_group_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.managed_image = Some(ManagedImageOutput {
            resource_group_name: resource_group_name.into(),
            name: name.into(),
            subscription_id: None,
        });
        self
    }

    /// Sets the VHD output.
    #[must_use]
    pub fn with_vhd_capture(
        mut self,
        container_name: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> Self {
        self.capture = Some(VhdCapture {
            container_name: container_name.into(),
            name_prefix: name_prefix.into(),
        });
        self
    }

    /// Sets the gallery destination.
    #[must_use]
    pub fn with_gallery(mut self, destination: GalleryDestination) -> Self {
        self.shared_image_gallery_destination = Some(destination);
        self
    }

    /// Builds in an existing resource group.
    #[must_use]
    pub fn with_build_resource_group(mut self, name: impl Into<String>) -> Self {
        self.build_resource_group_name = Some(name.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Replaces the timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// True when a managed image is produced.
    #[must_use]
    pub fn is_managed_image(&self) -> bool {
        self.managed_image.is_some()
    }

    /// True when a VHD is captured.
    #[must_use]
    pub fn is_vhd(&self) -> bool {
        self.capture.is_some()
    }

    /// True when the image is published to a gallery.
    #[must_use]
    pub fn is_sig_image(&self) -> bool {
        self.shared_image_gallery_destination.is_some()
    }

    /// Rejects configurations whose decision points contradict each other.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Configuration` describing the first inconsistency.
    pub fn validate(&self) -> Result<(), BuildError> {
        require_non_empty("subscription_id", &self.subscription_id)?;
        require_non_empty("location", &self.location)?;
        require_non_empty("source_image", &self.source_image)?;

        if self.build_resource_group_name.is_some() && self.temp_resource_group_name.is_some() {
            return Err(BuildError::configuration(
                "specify either build_resource_group_name or temp_resource_group_name, not both",
            ));
        }

        match (self.is_managed_image(), self.is_vhd(), self.is_sig_image()) {
            (true, true, _) => {
                return Err(BuildError::configuration(
                    "managed image and VHD outputs are mutually exclusive",
                ))
            }
            (false, true, true) => {
                return Err(BuildError::configuration(
                    "a shared image gallery destination cannot be combined with VHD capture",
                ))
            }
            (false, false, false) => {
                return Err(BuildError::configuration(
                    "no output configured: set managed_image, capture or shared_image_gallery_destination",
                ))
            }
            _ => {}
        }

        if let Some(managed) = &self.managed_image {
            require_non_empty("managed_image.resource_group_name", &managed.resource_group_name)?;
            require_non_empty("managed_image.name", &managed.name)?;
        }

        if let Some(capture) = &self.capture {
            require_non_empty("capture.container_name", &capture.container_name)?;
            require_non_empty("capture.name_prefix", &capture.name_prefix)?;
        }

        if let Some(sig) = &self.shared_image_gallery_destination {
            require_non_empty("shared_image_gallery_destination.resource_group", &sig.resource_group)?;
            require_non_empty("shared_image_gallery_destination.gallery_name", &sig.gallery_name)?;
            require_non_empty("shared_image_gallery_destination.image_name", &sig.image_name)?;
            if !IMAGE_VERSION.is_match(&sig.image_version) {
                return Err(BuildError::configuration(format!(
                    "shared_image_gallery_destination.image_version '{}' must be MAJOR.MINOR.PATCH",
                    sig.image_version
                )));
            }
            if sig.replica_count == Some(0) {
                return Err(BuildError::configuration(
                    "shared_image_gallery_destination.replica_count must be positive",
                ));
            }
        }

        self.timeouts.validate()?;

        Ok(())
    }

    /// Fills in generated names for the temporary resource group and VM.
    #[must_use]
    pub fn with_generated_names(mut self) -> Self {
        if self.build_resource_group_name.is_none() && self.temp_resource_group_name.is_none() {
            self.temp_resource_group_name = Some(temp_resource_group_name());
        }
        if self.temp_compute_name.is_none() {
            self.temp_compute_name = Some(temp_compute_name());
        }
        self
    }

    /// Name of the resource group the VM is built in.
    #[must_use]
    pub fn resource_group_name(&self) -> Option<&str> {
        self.build_resource_group_name
            .as_deref()
            .or(self.temp_resource_group_name.as_deref())
    }

    /// Writes every configuration-derived key into `state`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Configuration` if generated names have not been filled in.
    pub fn seed_state(&self, state: &StateBag) -> Result<(), BuildError> {
        let resource_group = self.resource_group_name().ok_or_else(|| {
            BuildError::configuration("resource group name has not been resolved")
        })?;
        let compute_name = self
            .temp_compute_name
            .as_deref()
            .ok_or_else(|| BuildError::configuration("compute name has not been resolved"))?;

        state.put(keys::SUBSCRIPTION_ID, json!(self.subscription_id));
        state.put(keys::LOCATION, json!(self.location));
        state.put(keys::TAGS, json!(self.tags));
        state.put(keys::RESOURCE_GROUP_NAME, json!(resource_group));
        state.put(
            keys::IS_EXISTING_RESOURCE_GROUP,
            json!(self.build_resource_group_name.is_some()),
        );
        state.put(keys::ASYNC_RESOURCE_GROUP_DELETE, json!(self.async_resourcegroup_delete));
        state.put(keys::COMPUTE_NAME, json!(compute_name));
        state.put(keys::VM_SIZE, json!(self.vm_size));
        state.put(keys::SOURCE_IMAGE, json!(self.source_image));
        state.put(keys::OS_DISK_NAME, json!(os_disk_name(compute_name)));

        state.put(keys::IS_MANAGED_IMAGE, json!(self.is_managed_image()));
        let managed_subscription = self
            .managed_image
            .as_ref()
            .and_then(|m| m.subscription_id.clone())
            .unwrap_or_else(|| self.subscription_id.clone());
        state.put(keys::MANAGED_IMAGE_SUBSCRIPTION, json!(managed_subscription));
        if let Some(managed) = &self.managed_image {
            state.put(
                keys::MANAGED_IMAGE_RESOURCE_GROUP_NAME,
                json!(managed.resource_group_name),
            );
            state.put(keys::MANAGED_IMAGE_NAME, json!(managed.name));
        }

        state.put(keys::IS_VHD, json!(self.is_vhd()));
        if let Some(capture) = &self.capture {
            state.put(keys::CAPTURE_CONTAINER_NAME, json!(capture.container_name));
            state.put(keys::CAPTURE_NAME_PREFIX, json!(capture.name_prefix));
        }

        state.put(keys::IS_SIG_IMAGE, json!(self.is_sig_image()));
        if let Some(sig) = &self.shared_image_gallery_destination {
            state.put(keys::SIG_PUBLISH_RESOURCE_GROUP, json!(sig.resource_group));
            state.put(keys::SIG_GALLERY_NAME, json!(sig.gallery_name));
            state.put(keys::SIG_IMAGE_NAME, json!(sig.image_name));
            state.put(keys::SIG_IMAGE_VERSION, json!(sig.image_version));
            state.put(
                keys::SIG_DESTINATION_SUBSCRIPTION,
                json!(sig.subscription.as_deref().unwrap_or(&self.subscription_id)),
            );
            state.put(keys::SIG_REPLICATION_REGIONS, json!(sig.replication_regions));
            state.put(keys::SIG_STORAGE_ACCOUNT_TYPE, json!(sig.storage_account_type));
            if let Some(count) = sig.replica_count {
                state.put(keys::SIG_REPLICA_COUNT, json!(count));
            }
            state.put(keys::SIG_SHALLOW_REPLICATION, json!(sig.shallow_replication));
            state.put(keys::SIG_EXCLUDE_FROM_LATEST, json!(sig.exclude_from_latest));
            if let Some(eol) = &sig.end_of_life_date {
                state.put(keys::SIG_END_OF_LIFE_DATE, json!(eol));
            }
        }

        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), BuildError> {
    if value.trim().is_empty() {
        return Err(BuildError::configuration(format!("{field} must not be empty")));
    }
    Ok(())
}
