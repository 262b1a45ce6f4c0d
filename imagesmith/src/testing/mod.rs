//! Deterministic doubles for exercising builds without a cloud.
//!
//! This module provides:
//! - [`FakeCloud`], an in-memory provider with scripted failures
//! - Recording doubles for steps and operator output
//! - Prepared states and configurations

mod fake_cloud;
mod fixtures;
mod mocks;

pub use fake_cloud::{ops, FakeCloud, FakeCloudCall};
pub use fixtures::{
    gallery_destination, gallery_state, managed_gallery_config, vhd_config, vhd_state,
    SUBSCRIPTION, VM_ID,
};
pub use mocks::{Journal, RecordingStep, RecordingUi};
