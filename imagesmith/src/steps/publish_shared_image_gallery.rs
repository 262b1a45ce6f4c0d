//! Publishes the image as a new shared image gallery version.
//!
//! The step is gated by a predicate evaluated before anything else: when it
//! says no, the step touches neither the cloud nor the state. Otherwise it
//! derives a [`PublishArgs`] from the state, refuses to touch a version that
//! already exists, and waits for replication to finish. The version is
//! recorded for teardown only once the provider has accepted the create.

use super::{finish, BuildContext, Step, StepAction};
use crate::cloud::{
    managed_image_id, GalleryOps, ImageParameters, ImageVersionId, PublishArgs, ReplicationMode,
    SharedImageGalleryDestination,
};
use crate::config::MAX_REPLICA_COUNT;
use crate::errors::BuildError;
use crate::observability::Ui;
use crate::state::{keys, StateBag};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether the build targets a gallery.
pub type GalleryGate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Builds the publish request for this build from accumulated state.
///
/// The source is the managed image when the build produced one, otherwise the
/// generalized VM. An absent replica count means 1; larger counts are capped
/// at [`MAX_REPLICA_COUNT`]. Regions are passed through in configured order,
/// duplicates included.
///
/// # Errors
///
/// `BuildError::Configuration` when the source inputs are inconsistent or the
/// replica count is 0, and `MissingState`/`StateType` when a required key is
/// absent or malformed.
pub fn build_publish_args(state: &StateBag) -> Result<PublishArgs, BuildError> {
    let subscription_id = state.require_string(keys::MANAGED_IMAGE_SUBSCRIPTION)?;
    let source_id = source_id(state, &subscription_id)?;

    let replica_count = match state.get_as::<u32>(keys::SIG_REPLICA_COUNT)? {
        None => 1,
        Some(0) => {
            return Err(BuildError::configuration(
                "shared_image_gallery_destination.replica_count must be positive",
            ))
        }
        Some(count) if count > MAX_REPLICA_COUNT => {
            warn!(
                requested = count,
                max = MAX_REPLICA_COUNT,
                "Replica count above the service limit, capping"
            );
            MAX_REPLICA_COUNT
        }
        Some(count) => count,
    };

    let replication_mode = if state.flag(keys::SIG_SHALLOW_REPLICATION) {
        ReplicationMode::Shallow
    } else {
        ReplicationMode::Full
    };

    Ok(PublishArgs {
        subscription_id,
        source_id,
        location: state.require_string(keys::LOCATION)?,
        replica_count,
        replication_mode,
        tags: state.get_as(keys::TAGS)?.unwrap_or_default(),
        shared_image_gallery: SharedImageGalleryDestination {
            gallery_name: state.require_string(keys::SIG_GALLERY_NAME)?,
            image_name: state.require_string(keys::SIG_IMAGE_NAME)?,
            image_version: state.require_string(keys::SIG_IMAGE_VERSION)?,
            subscription: state.require_string(keys::SIG_DESTINATION_SUBSCRIPTION)?,
            resource_group: state.require_string(keys::SIG_PUBLISH_RESOURCE_GROUP)?,
            replication_regions: state
                .get_as(keys::SIG_REPLICATION_REGIONS)?
                .unwrap_or_default(),
            storage_account_type: state.require_string(keys::SIG_STORAGE_ACCOUNT_TYPE)?,
            exclude_from_latest: state.flag(keys::SIG_EXCLUDE_FROM_LATEST),
            end_of_life_date: state.get_string(keys::SIG_END_OF_LIFE_DATE)?,
        },
    })
}

fn source_id(state: &StateBag, subscription_id: &str) -> Result<String, BuildError> {
    if state.flag(keys::IS_MANAGED_IMAGE) {
        let resource_group = state.require_string(keys::MANAGED_IMAGE_RESOURCE_GROUP_NAME)?;
        let name = state.require_string(keys::MANAGED_IMAGE_NAME)?;
        return Ok(managed_image_id(subscription_id, &resource_group, &name));
    }

    if state.get_string(keys::MANAGED_IMAGE_NAME)?.is_some() {
        return Err(BuildError::configuration(
            "a managed image name is set but the build does not produce a managed image",
        ));
    }
    state
        .get_as::<ImageParameters>(keys::IMAGE_PARAMETERS)?
        .and_then(|p| p.source_virtual_machine_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            BuildError::configuration(
                "gallery publish needs either a managed image or a generalized source VM, found neither",
            )
        })
}

/// Publishes the image version and, if the build fails afterwards, retracts it.
pub struct StepPublishToSharedImageGallery {
    gallery: Arc<dyn GalleryOps>,
    ui: Arc<dyn Ui>,
    to_sig: GalleryGate,
}

impl StepPublishToSharedImageGallery {
    /// Creates the step with its decision gate.
    pub fn new(
        gallery: Arc<dyn GalleryOps>,
        ui: Arc<dyn Ui>,
        to_sig: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            gallery,
            ui,
            to_sig: Arc::new(to_sig),
        }
    }

    async fn execute(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        let args = build_publish_args(state)?;
        let target = args.version_id();
        if self.gallery.image_version_exists(&target).await? {
            return Err(BuildError::configuration(format!(
                "gallery image version {target} already exists"
            )));
        }

        let destination = &args.shared_image_gallery;
        self.ui.say(&format!(
            "Publishing image version {} of '{}' to gallery '{}' (resource group '{}')",
            destination.image_version,
            destination.image_name,
            destination.gallery_name,
            destination.resource_group
        ));
        self.ui.say(&format!(
            " -> source: {}, regions: {:?}, replicas: {}, replication: {}, storage: {}",
            args.source_id,
            destination.replication_regions,
            args.replica_count,
            args.replication_mode,
            destination.storage_account_type
        ));

        let op = self
            .gallery
            .begin_publish_image_version(&args, &ctx.cancel)
            .await?;
        state.put_as(keys::GALLERY_PUBLISH_TARGET, &target)?;
        let id = self.gallery.wait_for_publish(op, &args, &ctx.cancel).await?;
        self.ui.say(&format!("Published gallery image version {id}"));
        state.put(keys::GALLERY_IMAGE_VERSION_ID, json!(id));
        Ok(())
    }
}

impl std::fmt::Debug for StepPublishToSharedImageGallery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepPublishToSharedImageGallery")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for StepPublishToSharedImageGallery {
    fn name(&self) -> &str {
        "publish_shared_image_gallery"
    }

    async fn run(&self, ctx: &BuildContext, state: &StateBag) -> StepAction {
        if !(self.to_sig)() {
            debug!("Build does not target a shared image gallery, skipping");
            return StepAction::Continue;
        }
        finish(self.ui.as_ref(), self.execute(ctx, state).await)
    }

    /// Deletes the version only when the build failed after the provider
    /// accepted the publish.
    async fn cleanup(&self, ctx: &BuildContext, state: &StateBag) -> Result<(), BuildError> {
        if !state.has_error() {
            return Ok(());
        }
        let Some(target) = state.get_as::<ImageVersionId>(keys::GALLERY_PUBLISH_TARGET)? else {
            return Ok(());
        };

        self.ui
            .say(&format!("Build failed, removing gallery image version {target}"));
        match self.gallery.delete_image_version(&target, &ctx.cancel).await {
            Ok(()) => {
                self.ui.say(&format!("Removed gallery image version {target}"));
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                info!(version = %target, "Gallery image version does not exist, nothing to delete");
                self.ui
                    .say(&format!("Gallery image version {target} does not exist, nothing to delete"));
                Ok(())
            }
            Err(err) => {
                warn!(version = %target, error = %err, "Failed to delete gallery image version");
                self.ui.error(&format!(
                    "Error deleting gallery image version {target}, delete it manually: {err}"
                ));
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudClient;
    use crate::config::Timeouts;
    use crate::errors::CloudError;
    use crate::testing::{
        gallery_state, ops, vhd_state, FakeCloud, FakeCloudCall, RecordingUi, SUBSCRIPTION, VM_ID,
    };
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Harness {
        fake: Arc<FakeCloud>,
        ui: Arc<RecordingUi>,
        step: StepPublishToSharedImageGallery,
    }

    fn harness(fake: FakeCloud, to_sig: bool) -> Harness {
        let fake = Arc::new(fake);
        let ui = Arc::new(RecordingUi::new());
        let timeouts = Timeouts::new().with_polling_interval(5.0);
        let step = StepPublishToSharedImageGallery::new(
            Arc::new(CloudClient::new(fake.clone(), timeouts)),
            ui.clone(),
            move || to_sig,
        );
        Harness { fake, ui, step }
    }

    fn published_args(fake: &FakeCloud) -> Vec<PublishArgs> {
        fake.calls()
            .into_iter()
            .filter_map(|call| match call {
                FakeCloudCall::CreateGalleryImageVersion(args) => Some(args),
                _ => None,
            })
            .collect()
    }

    fn expected_fixture_args() -> PublishArgs {
        PublishArgs {
            subscription_id: SUBSCRIPTION.to_string(),
            source_id: VM_ID.to_string(),
            location: "Unit Test: Location".to_string(),
            replica_count: 1,
            replication_mode: ReplicationMode::Full,
            tags: HashMap::from([("tag01".to_string(), "Unit Test: Tags".to_string())]),
            shared_image_gallery: SharedImageGalleryDestination {
                gallery_name: "Unit Test: ManagedImageSharedGalleryName".to_string(),
                image_name: "Unit Test: ManagedImageSharedGalleryImageName".to_string(),
                image_version: "Unit Test: ManagedImageSharedGalleryImageVersion".to_string(),
                subscription: SUBSCRIPTION.to_string(),
                resource_group: "Unit Test: ManagedImageSigPublishResourceGroup".to_string(),
                replication_regions: vec![
                    "ManagedImageSharedGalleryReplicationRegionA".to_string(),
                    "ManagedImageSharedGalleryReplicationRegionB".to_string(),
                ],
                storage_account_type: "Standard_LRS".to_string(),
                exclude_from_latest: false,
                end_of_life_date: None,
            },
        }
    }

    fn small_state() -> StateBag {
        let state = StateBag::new();
        state.put(keys::MANAGED_IMAGE_SUBSCRIPTION, json!("sub"));
        state.put(keys::SIG_DESTINATION_SUBSCRIPTION, json!("sub"));
        state.put(keys::IS_MANAGED_IMAGE, json!(false));
        state.put(
            keys::IMAGE_PARAMETERS,
            json!({ "location": "L", "source_virtual_machine_id": "vm-1" }),
        );
        state.put(keys::LOCATION, json!("L"));
        state.put(keys::SIG_GALLERY_NAME, json!("g"));
        state.put(keys::SIG_IMAGE_NAME, json!("img"));
        state.put(keys::SIG_IMAGE_VERSION, json!("1.0.0"));
        state.put(keys::SIG_PUBLISH_RESOURCE_GROUP, json!("rg"));
        state.put(keys::SIG_REPLICATION_REGIONS, json!(["A", "B"]));
        state.put(keys::SIG_STORAGE_ACCOUNT_TYPE, json!("Standard_LRS"));
        state.put(keys::TAGS, json!({ "t": "v" }));
        state
    }

    #[tokio::test]
    async fn test_gate_false_makes_no_calls() {
        let h = harness(FakeCloud::new(), false);
        let state = vhd_state();
        let keys_before = state.keys().len();

        let action = h.step.run(&BuildContext::new("test"), &state).await;

        assert_eq!(action, StepAction::Continue);
        assert!(h.fake.calls().is_empty());
        assert!(!state.has_error());
        assert_eq!(state.keys().len(), keys_before);
        assert!(h.ui.said().is_empty());
    }

    #[tokio::test]
    async fn test_publishes_managed_image() {
        let h = harness(FakeCloud::new(), true);
        let state = gallery_state(true);

        let action = h.step.run(&BuildContext::new("test"), &state).await;

        assert_eq!(action, StepAction::Continue);
        let args = published_args(&h.fake);
        assert_eq!(args.len(), 1);
        assert_eq!(
            args[0].source_id,
            managed_image_id(
                SUBSCRIPTION,
                "Unit Test: ManagedImageResourceGroupName",
                "Unit Test: ManagedImageName"
            )
        );
        assert!(state.contains(keys::GALLERY_IMAGE_VERSION_ID));
    }

    #[tokio::test]
    async fn test_publishes_generalized_vm() {
        let h = harness(FakeCloud::new(), true);
        let state = gallery_state(false);

        assert_eq!(h.step.run(&BuildContext::new("test"), &state).await, StepAction::Continue);

        assert_eq!(published_args(&h.fake), vec![expected_fixture_args()]);
        assert!(!state.has_error());
    }

    #[test]
    fn test_request_from_minimal_state() {
        let args = build_publish_args(&small_state()).unwrap();

        assert_eq!(
            args,
            PublishArgs {
                subscription_id: "sub".into(),
                source_id: "vm-1".into(),
                location: "L".into(),
                replica_count: 1,
                replication_mode: ReplicationMode::Full,
                tags: HashMap::from([("t".to_string(), "v".to_string())]),
                shared_image_gallery: SharedImageGalleryDestination {
                    gallery_name: "g".into(),
                    image_name: "img".into(),
                    image_version: "1.0.0".into(),
                    subscription: "sub".into(),
                    resource_group: "rg".into(),
                    replication_regions: vec!["A".into(), "B".into()],
                    storage_account_type: "Standard_LRS".into(),
                    exclude_from_latest: false,
                    end_of_life_date: None,
                },
            }
        );
    }

    #[test]
    fn test_shallow_flag_only_changes_mode() {
        let state = gallery_state(false);
        state.put(keys::SIG_SHALLOW_REPLICATION, json!(true));

        let expected = PublishArgs {
            replication_mode: ReplicationMode::Shallow,
            ..expected_fixture_args()
        };
        assert_eq!(build_publish_args(&state).unwrap(), expected);
    }

    #[test]
    fn test_replica_override_only_changes_count() {
        let state = gallery_state(false);
        state.put(keys::SIG_REPLICA_COUNT, json!(5));

        let expected = PublishArgs {
            replica_count: 5,
            ..expected_fixture_args()
        };
        assert_eq!(build_publish_args(&state).unwrap(), expected);
    }

    #[test]
    fn test_replica_count_bounds() {
        let state = gallery_state(false);

        assert_eq!(build_publish_args(&state).unwrap().replica_count, 1);

        state.put(keys::SIG_REPLICA_COUNT, json!(0));
        assert!(matches!(
            build_publish_args(&state),
            Err(BuildError::Configuration(msg)) if msg.contains("replica_count")
        ));

        state.put(keys::SIG_REPLICA_COUNT, json!(250));
        assert_eq!(build_publish_args(&state).unwrap().replica_count, MAX_REPLICA_COUNT);
    }

    #[test]
    fn test_duplicate_regions_pass_through() {
        let state = small_state();
        state.put(keys::SIG_REPLICATION_REGIONS, json!(["B", "A", "B"]));

        let args = build_publish_args(&state).unwrap();

        assert_eq!(
            args.shared_image_gallery.replication_regions,
            vec!["B".to_string(), "A".to_string(), "B".to_string()]
        );
    }

    #[test]
    fn test_supplemental_destination_fields() {
        let state = small_state();
        state.put(keys::SIG_EXCLUDE_FROM_LATEST, json!(true));
        state.put(keys::SIG_END_OF_LIFE_DATE, json!("2030-01-01T00:00:00Z"));

        let dest = build_publish_args(&state).unwrap().shared_image_gallery;

        assert!(dest.exclude_from_latest);
        assert_eq!(dest.end_of_life_date.as_deref(), Some("2030-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_missing_source_is_configuration_error() {
        let h = harness(FakeCloud::new(), true);
        let state = small_state();
        state.remove(keys::IMAGE_PARAMETERS);

        let action = h.step.run(&BuildContext::new("test"), &state).await;

        match action {
            StepAction::Halt(err) => assert!(matches!(err, BuildError::Configuration(_))),
            StepAction::Continue => panic!("expected halt"),
        }
        assert!(h.fake.calls().is_empty());
        assert_eq!(h.ui.errors().len(), 1);
    }

    #[test]
    fn test_managed_name_without_managed_build_is_inconsistent() {
        let state = small_state();
        state.put(keys::MANAGED_IMAGE_NAME, json!("img"));

        let err = build_publish_args(&state).unwrap_err();

        assert!(matches!(err, BuildError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_remote_failure_is_kept_verbatim() {
        let h = harness(FakeCloud::new(), true);
        let details = r#"{"error":{"code":"ReplicationFailed","target":"B"}}"#.to_string();
        h.fake.fail_operation(
            ops::CREATE_GALLERY_IMAGE_VERSION,
            "ReplicationFailed",
            "region B is unavailable",
            Some(details.clone()),
        );
        let state = small_state();

        let action = h.step.run(&BuildContext::new("test"), &state).await;

        assert_eq!(
            action,
            StepAction::Halt(BuildError::Cloud(CloudError::Remote {
                operation: ops::CREATE_GALLERY_IMAGE_VERSION.to_string(),
                code: "ReplicationFailed".to_string(),
                message: "region B is unavailable".to_string(),
                details: Some(details),
            }))
        );
        assert!(!state.contains(keys::GALLERY_IMAGE_VERSION_ID));
    }

    #[tokio::test]
    async fn test_cleanup_after_failed_build_deletes_version() {
        let h = harness(FakeCloud::new(), true);
        let ctx = BuildContext::new("test");
        let state = small_state();
        h.step.run(&ctx, &state).await;
        let target = build_publish_args(&state).unwrap().version_id();
        assert!(h.fake.has_image_version(&target));

        state.set_error(BuildError::Internal("later step failed".into()));
        h.step.cleanup(&ctx, &state).await.unwrap();

        assert!(!h.fake.has_image_version(&target));
    }

    #[tokio::test]
    async fn test_cleanup_after_success_keeps_version() {
        let h = harness(FakeCloud::new(), true);
        let ctx = BuildContext::new("test");
        let state = small_state();
        h.step.run(&ctx, &state).await;

        h.step.cleanup(&ctx, &state).await.unwrap();

        assert_eq!(published_args(&h.fake).len(), 1);
        assert!(!h
            .fake
            .calls()
            .iter()
            .any(|c| matches!(c, FakeCloudCall::DeleteGalleryImageVersion(_))));
    }

    #[tokio::test]
    async fn test_existing_version_is_refused_and_survives_teardown() {
        let target = build_publish_args(&small_state()).unwrap().version_id();
        let h = harness(FakeCloud::new().with_image_version(target.clone()), true);
        let ctx = BuildContext::new("test");
        let state = small_state();

        let action = h.step.run(&ctx, &state).await;

        match action {
            StepAction::Halt(BuildError::Configuration(msg)) => {
                assert!(msg.contains("already exists"), "{msg}");
            }
            other => panic!("expected configuration halt, got {other:?}"),
        }
        assert!(published_args(&h.fake).is_empty());
        assert!(!state.contains(keys::GALLERY_PUBLISH_TARGET));

        state.set_error(BuildError::Internal("gallery step halted".into()));
        h.step.cleanup(&ctx, &state).await.unwrap();

        assert!(h.fake.has_image_version(&target));
        assert_eq!(
            h.fake.calls(),
            vec![FakeCloudCall::GalleryImageVersionExists(target)]
        );
    }

    #[tokio::test]
    async fn test_rejected_publish_leaves_nothing_to_clean_up() {
        let h = harness(FakeCloud::new(), true);
        h.fake.fail_begin(
            ops::CREATE_GALLERY_IMAGE_VERSION,
            CloudError::remote(
                ops::CREATE_GALLERY_IMAGE_VERSION,
                "Conflict",
                "version is busy",
            ),
        );
        let ctx = BuildContext::new("test");
        let state = small_state();

        let action = h.step.run(&ctx, &state).await;
        assert!(action.is_halt());
        assert!(!state.contains(keys::GALLERY_PUBLISH_TARGET));

        state.set_error(BuildError::Internal("gallery step halted".into()));
        h.step.cleanup(&ctx, &state).await.unwrap();

        assert!(!h
            .fake
            .calls()
            .iter()
            .any(|c| matches!(c, FakeCloudCall::DeleteGalleryImageVersion(_))));
    }

    #[tokio::test]
    async fn test_accepted_publish_is_recorded_for_teardown() {
        let h = harness(FakeCloud::new(), true);
        h.fake.fail_operation(
            ops::CREATE_GALLERY_IMAGE_VERSION,
            "ReplicationFailed",
            "region B",
            None,
        );
        let state = small_state();

        h.step.run(&BuildContext::new("test"), &state).await;

        let recorded: Option<ImageVersionId> =
            state.get_as(keys::GALLERY_PUBLISH_TARGET).unwrap();
        assert_eq!(
            recorded,
            Some(build_publish_args(&state).unwrap().version_id())
        );
    }

    #[tokio::test]
    async fn test_cleanup_of_missing_version_is_only_logged() {
        let h = harness(FakeCloud::new(), true);
        let state = small_state();
        let target = build_publish_args(&state).unwrap().version_id();
        state.put_as(keys::GALLERY_PUBLISH_TARGET, &target).unwrap();
        state.set_error(BuildError::Internal("publish failed".into()));

        let result = h.step.cleanup(&BuildContext::new("test"), &state).await;

        assert!(result.is_ok());
        assert_eq!(
            h.fake.calls(),
            vec![FakeCloudCall::DeleteGalleryImageVersion(target)]
        );
        assert!(h.ui.errors().is_empty());
        assert!(h.ui.said().iter().any(|m| m.contains("does not exist")));
    }

    #[tokio::test]
    async fn test_cleanup_without_publish_attempt_is_noop() {
        let h = harness(FakeCloud::new(), true);
        let state = vhd_state();
        state.set_error(BuildError::Internal("boom".into()));

        h.step.cleanup(&BuildContext::new("test"), &state).await.unwrap();

        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_publish_returns_within_one_interval() {
        let h = harness(FakeCloud::new(), true);
        h.fake.hang(ops::CREATE_GALLERY_IMAGE_VERSION);
        let ctx = BuildContext::new("test");
        let state = small_state();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            cancel.cancel("user abort");
        });
        let start = tokio::time::Instant::now();

        let action = h.step.run(&ctx, &state).await;

        assert!(start.elapsed() < Duration::from_secs(12 + 5));
        match action {
            StepAction::Halt(err) => assert!(err.is_cancellation(), "{err}"),
            StepAction::Continue => panic!("expected halt"),
        }
    }
}
