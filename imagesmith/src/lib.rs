//! # Imagesmith
//!
//! Builds virtual machine images in a public cloud and publishes them.
//!
//! A build provisions a temporary resource group and VM from a source image,
//! waits for it to boot, generalizes it and captures it as a managed image or
//! a VHD blob. Managed images can then be replicated into a shared image
//! gallery as a new image version. Every step registers its own teardown, so
//! a failed or cancelled build removes what it created.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imagesmith::prelude::*;
//!
//! let config = BuildConfig::new("sub", "westeurope", "Canonical:ubuntu:22_04:latest")
//!     .with_managed_image("images-rg", "base-image");
//! let builder = ImageBuilder::new("base-image", config)?;
//! let cloud = builder.client(provider);
//!
//! let result = builder.run(cloud).await;
//! println!("{:?}", result.artifact);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod builder;
pub mod cancellation;
pub mod cloud;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod state;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::{Artifact, BuildResult, ImageBuilder};
    pub use crate::cancellation::CancellationToken;
    pub use crate::cloud::{
        CloudApi, CloudClient, CloudOps, GalleryOps, ImageOps, ResourceGroupOps,
        VirtualMachineOps,
    };
    pub use crate::config::{BuildConfig, GalleryDestination, Timeouts};
    pub use crate::errors::{BuildError, CloudError, ErrorClass};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, TracingUi, Ui};
    pub use crate::pipeline::{RunReport, RunnerPhase, StepRunner};
    pub use crate::state::{keys, StateBag};
    pub use crate::steps::{BuildContext, Step, StepAction};
}
