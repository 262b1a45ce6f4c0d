//! End-to-end image builds.
//!
//! [`ImageBuilder`] turns a validated [`BuildConfig`] into the fixed step
//! sequence, seeds the build state from it and drives the [`StepRunner`]. The
//! output decisions (managed image, VHD, gallery) only change which remote
//! calls the steps make, never the shape of the pipeline.

use crate::cancellation::CancellationToken;
use crate::cloud::{CloudApi, CloudClient, CloudOps};
use crate::config::BuildConfig;
use crate::errors::BuildError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::observability::{TracingUi, Ui};
use crate::pipeline::{RunReport, StepRunner};
use crate::state::{keys, StateBag};
use crate::steps::{
    BuildContext, Step, StepCaptureVhd, StepCreateResourceGroup, StepDeleteTemporaryResources,
    StepDeployVm, StepGeneralize, StepPublishToManagedImage, StepPublishToSharedImageGallery,
    StepWaitForReady,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What a successful build produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Resource id of the managed image.
    pub managed_image_id: Option<String>,
    /// URI of the captured VHD blob.
    pub vhd_uri: Option<String>,
    /// Resource id of the published gallery image version.
    pub gallery_image_version_id: Option<String>,
}

impl Artifact {
    fn from_state(state: &StateBag) -> Self {
        let read = |key: &str| state.get_string(key).ok().flatten();
        Self {
            managed_image_id: read(keys::MANAGED_IMAGE_ID),
            vhd_uri: read(keys::CAPTURED_VHD_URI),
            gallery_image_version_id: read(keys::GALLERY_IMAGE_VERSION_ID),
        }
    }
}

/// Outcome of one build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// When the build started.
    pub started_at: DateTime<Utc>,
    /// When teardown finished.
    pub ended_at: DateTime<Utc>,
    /// Outputs, present only if the build succeeded.
    pub artifact: Option<Artifact>,
    /// The error that failed the build.
    pub error: Option<BuildError>,
    /// What the runner did.
    pub report: RunReport,
}

impl BuildResult {
    /// True if no error was recorded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Wall-clock duration of the build.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Drives one image build.
pub struct ImageBuilder {
    name: String,
    config: BuildConfig,
    ui: Arc<dyn Ui>,
    events: Arc<dyn EventSink>,
}

impl ImageBuilder {
    /// Validates `config` and fills in generated names.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Configuration` for inconsistent configurations.
    /// Nothing remote has happened at that point.
    pub fn new(name: impl Into<String>, config: BuildConfig) -> Result<Self, BuildError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config: config.with_generated_names(),
            ui: Arc::new(TracingUi),
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Replaces the operator output.
    #[must_use]
    pub fn with_ui(mut self, ui: Arc<dyn Ui>) -> Self {
        self.ui = ui;
        self
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Wraps a provider in a client using this build's timeouts.
    #[must_use]
    pub fn client(&self, api: Arc<dyn CloudApi>) -> Arc<CloudClient> {
        Arc::new(CloudClient::new(api, self.config.timeouts.clone()))
    }

    /// The step sequence, in execution order.
    pub fn steps<C: CloudOps + 'static>(&self, cloud: &Arc<C>) -> Vec<Arc<dyn Step>> {
        let ui = &self.ui;
        let to_sig = self.config.is_sig_image();
        vec![
            Arc::new(StepCreateResourceGroup::new(cloud.clone(), ui.clone())),
            Arc::new(StepDeployVm::new(cloud.clone(), ui.clone())),
            Arc::new(StepWaitForReady::new(cloud.clone(), ui.clone())),
            Arc::new(StepGeneralize::new(cloud.clone(), ui.clone())),
            Arc::new(StepCaptureVhd::new(cloud.clone(), ui.clone())),
            Arc::new(StepPublishToManagedImage::new(cloud.clone(), ui.clone())),
            Arc::new(StepPublishToSharedImageGallery::new(
                cloud.clone(),
                ui.clone(),
                move || to_sig,
            )),
            Arc::new(StepDeleteTemporaryResources::new(cloud.clone(), ui.clone())),
        ]
    }

    /// Runs the build to completion, including teardown.
    pub async fn run<C: CloudOps + 'static>(&self, cloud: Arc<C>) -> BuildResult {
        self.run_with_cancellation(cloud, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs the build under `cancel`. Cancelling it makes in-flight waits
    /// return promptly; teardown still runs. The build deadline, if any, is
    /// armed on the same token, so pass a fresh token per run.
    pub async fn run_with_cancellation<C: CloudOps + 'static>(
        &self,
        cloud: Arc<C>,
        cancel: Arc<CancellationToken>,
    ) -> BuildResult {
        let started_at = Utc::now();
        let ctx = BuildContext::new(self.name.clone())
            .with_cancellation(Arc::clone(&cancel))
            .with_events(Arc::clone(&self.events));
        let state = StateBag::new();

        info!(build = %self.name, run_id = %ctx.run_id, "Starting image build");
        self.events
            .emit(
                events::BUILD_STARTED,
                Some(json!({
                    "build": self.name,
                    "run_id": ctx.run_id.to_string(),
                    "managed_image": self.config.is_managed_image(),
                    "vhd": self.config.is_vhd(),
                    "shared_image_gallery": self.config.is_sig_image(),
                })),
            )
            .await;

        let report = match self.config.seed_state(&state) {
            Ok(()) => {
                let watcher = self
                    .config
                    .timeouts
                    .build_timeout()
                    .map(|deadline| cancel.cancel_after(deadline));
                let runner = StepRunner::new(self.steps(&cloud));
                let report = runner.run(&ctx, &state).await;
                if let Some(watcher) = watcher {
                    watcher.abort();
                }
                report
            }
            Err(err) => {
                state.set_error(err);
                RunReport::default()
            }
        };

        let error = state.error();
        let artifact = error.is_none().then(|| Artifact::from_state(&state));
        match &error {
            None => info!(build = %self.name, artifact = ?artifact, "Build finished"),
            Some(err) => warn!(build = %self.name, error = %err, class = ?err.class(), "Build failed"),
        }
        self.events
            .emit(
                events::BUILD_COMPLETED,
                Some(json!({
                    "build": self.name,
                    "run_id": ctx.run_id.to_string(),
                    "succeeded": error.is_none(),
                    "error": error.as_ref().map(ToString::to_string),
                })),
            )
            .await;

        BuildResult {
            run_id: ctx.run_id,
            started_at,
            ended_at: Utc::now(),
            artifact,
            error,
            report,
        }
    }
}

impl std::fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
