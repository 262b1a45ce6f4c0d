//! Well-known build state keys.
//!
//! Steps communicate exclusively through these keys. Configuration seeds the
//! first group; the remaining keys are written by steps as the build advances.

// Seeded from configuration.
/// Subscription the build runs in.
pub const SUBSCRIPTION_ID: &str = "arm.subscription_id";
/// Region of the build VM and its resource group.
pub const LOCATION: &str = "arm.location";
/// Tags applied to every created resource (`map<string,string>`).
pub const TAGS: &str = "arm.tags";
/// Resource group the build VM lives in.
pub const RESOURCE_GROUP_NAME: &str = "arm.resource_group_name";
/// True when the resource group already existed and must not be deleted.
pub const IS_EXISTING_RESOURCE_GROUP: &str = "arm.is_existing_resource_group";
/// Delete the temporary resource group without waiting.
pub const ASYNC_RESOURCE_GROUP_DELETE: &str = "arm.async_resource_group_delete";
/// Name of the build VM.
pub const COMPUTE_NAME: &str = "arm.compute_name";
/// Size of the build VM.
pub const VM_SIZE: &str = "arm.vm_size";
/// Source image reference for the build VM.
pub const SOURCE_IMAGE: &str = "arm.source_image";
/// Name of the build VM's OS disk.
pub const OS_DISK_NAME: &str = "arm.os_disk_name";

/// True when the build produces a managed image.
pub const IS_MANAGED_IMAGE: &str = "arm.is_managed_image";
/// Resource group of the managed image.
pub const MANAGED_IMAGE_RESOURCE_GROUP_NAME: &str = "arm.managed_image_resource_group_name";
/// Name of the managed image.
pub const MANAGED_IMAGE_NAME: &str = "arm.managed_image_name";
/// Subscription of the managed image; also the subscription gallery publishes are issued against.
pub const MANAGED_IMAGE_SUBSCRIPTION: &str = "arm.managed_image_subscription";

/// True when the build captures a VHD into a storage container.
pub const IS_VHD: &str = "arm.is_vhd";
/// Storage container receiving the captured VHD.
pub const CAPTURE_CONTAINER_NAME: &str = "arm.capture_container_name";
/// Blob name prefix of the captured VHD.
pub const CAPTURE_NAME_PREFIX: &str = "arm.capture_name_prefix";

/// True when the build publishes into a shared image gallery.
pub const IS_SIG_IMAGE: &str = "arm.is_sig_image";
/// Resource group holding the destination gallery.
pub const SIG_PUBLISH_RESOURCE_GROUP: &str = "arm.sig.publish_resource_group";
/// Destination gallery name.
pub const SIG_GALLERY_NAME: &str = "arm.sig.gallery_name";
/// Destination image definition name.
pub const SIG_IMAGE_NAME: &str = "arm.sig.image_name";
/// Destination image version, e.g. `1.0.0`.
pub const SIG_IMAGE_VERSION: &str = "arm.sig.image_version";
/// Subscription holding the destination gallery.
pub const SIG_DESTINATION_SUBSCRIPTION: &str = "arm.sig.destination_subscription";
/// Ordered replication regions (`[string]`).
pub const SIG_REPLICATION_REGIONS: &str = "arm.sig.replication_regions";
/// Storage account type of the replicas.
pub const SIG_STORAGE_ACCOUNT_TYPE: &str = "arm.sig.storage_account_type";
/// Explicit replica count override.
pub const SIG_REPLICA_COUNT: &str = "arm.sig.replica_count";
/// True to publish with shallow replication.
pub const SIG_SHALLOW_REPLICATION: &str = "arm.sig.shallow_replication";
/// True to exclude the version from "latest" resolution.
pub const SIG_EXCLUDE_FROM_LATEST: &str = "arm.sig.exclude_from_latest";
/// Optional end-of-life date of the version.
pub const SIG_END_OF_LIFE_DATE: &str = "arm.sig.end_of_life_date";

// Written by steps.
/// Set once the temporary resource group has been created by this build.
pub const RESOURCE_GROUP_CREATED: &str = "arm.resource_group_created";
/// Set as soon as VM creation has been requested.
pub const VM_DEPLOY_ATTEMPTED: &str = "arm.vm_deploy_attempted";
/// Resource id of the build VM.
pub const VM_ID: &str = "arm.vm_id";
/// Generalized image parameters (see [`crate::cloud::ImageParameters`]).
pub const IMAGE_PARAMETERS: &str = "arm.image_parameters";
/// URI of the captured VHD.
pub const CAPTURED_VHD_URI: &str = "arm.captured_vhd_uri";
/// Resource id of the created managed image.
pub const MANAGED_IMAGE_ID: &str = "arm.managed_image_id";
/// Identity of the gallery version a publish was attempted for.
pub const GALLERY_PUBLISH_TARGET: &str = "arm.sig.publish_target";
/// Resource id of the published gallery image version.
pub const GALLERY_IMAGE_VERSION_ID: &str = "arm.sig.image_version_id";
/// Set once the build VM and its disk have been removed.
pub const TEMP_RESOURCES_DELETED: &str = "arm.temp_resources_deleted";
