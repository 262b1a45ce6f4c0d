//! Prepared build states.

use serde_json::json;

use crate::cloud::ImageParameters;
use crate::config::BuildConfig;
use crate::config::GalleryDestination;
use crate::state::{keys, StateBag};

/// Subscription used by every fixture.
pub const SUBSCRIPTION: &str = "Unit Test: ManagedImageSubscription";
/// Source VM id used by non-managed gallery fixtures.
pub const VM_ID: &str = "Unit Test: VM ID";

/// State as the gallery publish step sees it at the end of a build.
///
/// With `managed` the build produced a managed image; otherwise the generalized
/// VM is the publish source.
#[must_use]
pub fn gallery_state(managed: bool) -> StateBag {
    let state = StateBag::new();
    state.put(keys::SIG_PUBLISH_RESOURCE_GROUP, json!("Unit Test: ManagedImageSigPublishResourceGroup"));
    state.put(keys::SIG_GALLERY_NAME, json!("Unit Test: ManagedImageSharedGalleryName"));
    state.put(keys::SIG_IMAGE_NAME, json!("Unit Test: ManagedImageSharedGalleryImageName"));
    state.put(keys::SIG_IMAGE_VERSION, json!("Unit Test: ManagedImageSharedGalleryImageVersion"));
    state.put(keys::LOCATION, json!("Unit Test: Location"));
    state.put(keys::TAGS, json!({ "tag01": "Unit Test: Tags" }));
    state.put(
        keys::SIG_REPLICATION_REGIONS,
        json!([
            "ManagedImageSharedGalleryReplicationRegionA",
            "ManagedImageSharedGalleryReplicationRegionB"
        ]),
    );
    state.put(keys::SIG_STORAGE_ACCOUNT_TYPE, json!("Standard_LRS"));
    if managed {
        state.put(keys::MANAGED_IMAGE_RESOURCE_GROUP_NAME, json!("Unit Test: ManagedImageResourceGroupName"));
        state.put(keys::MANAGED_IMAGE_NAME, json!("Unit Test: ManagedImageName"));
    } else {
        let parameters = ImageParameters {
            location: "Unit Test: Location".to_string(),
            source_virtual_machine_id: Some(VM_ID.to_string()),
            tags: Default::default(),
        };
        state.put(keys::IMAGE_PARAMETERS, json!(parameters));
    }
    state.put(keys::MANAGED_IMAGE_SUBSCRIPTION, json!(SUBSCRIPTION));
    state.put(keys::SIG_DESTINATION_SUBSCRIPTION, json!(SUBSCRIPTION));
    state.put(keys::IS_MANAGED_IMAGE, json!(managed));
    state.put(keys::IS_SIG_IMAGE, json!(true));
    state.put(keys::SIG_SHALLOW_REPLICATION, json!(false));
    state
}

/// State of a VHD-only build: no gallery keys at all.
#[must_use]
pub fn vhd_state() -> StateBag {
    let state = StateBag::new();
    state.put(keys::LOCATION, json!("Unit Test: Location"));
    state.put(keys::TAGS, json!({ "tag01": "Unit Test: Tags" }));
    state.put(keys::IS_VHD, json!(true));
    state
}

/// A gallery destination with two replication regions.
#[must_use]
pub fn gallery_destination() -> GalleryDestination {
    GalleryDestination {
        subscription: None,
        resource_group: "gallery-rg".to_string(),
        gallery_name: "g".to_string(),
        image_name: "img".to_string(),
        image_version: "1.0.0".to_string(),
        replication_regions: vec!["A".to_string(), "B".to_string()],
        storage_account_type: "Standard_LRS".to_string(),
        replica_count: None,
        shallow_replication: false,
        exclude_from_latest: false,
        end_of_life_date: None,
    }
}

/// A managed-image build that also publishes to a gallery.
#[must_use]
pub fn managed_gallery_config() -> BuildConfig {
    BuildConfig::new("sub", "L", "Canonical:UbuntuServer:18.04-LTS:latest")
        .with_managed_image("images-rg", "img")
        .with_gallery(gallery_destination())
        .with_tag("t", "v")
}

/// A VHD-only build.
#[must_use]
pub fn vhd_config() -> BuildConfig {
    BuildConfig::new("sub", "L", "Canonical:UbuntuServer:18.04-LTS:latest")
        .with_vhd_capture("images", "pkr")
}
