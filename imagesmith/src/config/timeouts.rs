//! Deadlines for each class of long-running operation.

use crate::errors::BuildError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for any configured wait: 30 days.
pub const MAX_TIMEOUT_SECONDS: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Polling interval and per-class deadlines, in seconds.
///
/// Gallery replication routinely takes far longer than VM lifecycle calls, so
/// each operation class gets its own ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Delay between two status polls of a long-running operation.
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: f64,
    /// Deadline for resource group and VM create/start/stop operations.
    #[serde(default = "default_vm_timeout")]
    pub vm_timeout_seconds: f64,
    /// Deadline for generalize, managed image and VHD capture operations.
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_seconds: f64,
    /// Deadline for gallery image version operations.
    #[serde(default = "default_gallery_timeout")]
    pub gallery_timeout_seconds: f64,
    /// Deadline for delete operations.
    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_seconds: f64,
    /// Optional ceiling for the whole build, after which it is cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_timeout_seconds: Option<f64>,
}

fn default_polling_interval() -> f64 {
    5.0
}

fn default_vm_timeout() -> f64 {
    20.0 * 60.0
}

fn default_capture_timeout() -> f64 {
    60.0 * 60.0
}

fn default_gallery_timeout() -> f64 {
    60.0 * 60.0
}

fn default_delete_timeout() -> f64 {
    30.0 * 60.0
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval(),
            vm_timeout_seconds: default_vm_timeout(),
            capture_timeout_seconds: default_capture_timeout(),
            gallery_timeout_seconds: default_gallery_timeout(),
            delete_timeout_seconds: default_delete_timeout(),
            build_timeout_seconds: None,
        }
    }
}

impl Timeouts {
    /// Creates the default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the polling interval.
    #[must_use]
    pub fn with_polling_interval(mut self, seconds: f64) -> Self {
        self.polling_interval_seconds = seconds;
        self
    }

    /// Sets the gallery deadline.
    #[must_use]
    pub fn with_gallery_timeout(mut self, seconds: f64) -> Self {
        self.gallery_timeout_seconds = seconds;
        self
    }

    /// Sets the VM deadline.
    #[must_use]
    pub fn with_vm_timeout(mut self, seconds: f64) -> Self {
        self.vm_timeout_seconds = seconds;
        self
    }

    /// Sets the whole-build deadline.
    #[must_use]
    pub fn with_build_timeout(mut self, seconds: f64) -> Self {
        self.build_timeout_seconds = Some(seconds);
        self
    }

    /// Polling interval as a `Duration`.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        seconds(self.polling_interval_seconds)
    }

    /// VM deadline as a `Duration`.
    #[must_use]
    pub fn vm_timeout(&self) -> Duration {
        seconds(self.vm_timeout_seconds)
    }

    /// Capture deadline as a `Duration`.
    #[must_use]
    pub fn capture_timeout(&self) -> Duration {
        seconds(self.capture_timeout_seconds)
    }

    /// Gallery deadline as a `Duration`.
    #[must_use]
    pub fn gallery_timeout(&self) -> Duration {
        seconds(self.gallery_timeout_seconds)
    }

    /// Delete deadline as a `Duration`.
    #[must_use]
    pub fn delete_timeout(&self) -> Duration {
        seconds(self.delete_timeout_seconds)
    }

    /// Whole-build deadline as a `Duration`.
    #[must_use]
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_seconds.map(seconds)
    }

    /// Checks that every value is a finite, positive number of seconds no
    /// larger than [`MAX_TIMEOUT_SECONDS`].
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Configuration` naming the first bad field.
    pub fn validate(&self) -> Result<(), BuildError> {
        let fields = [
            ("polling_interval_seconds", Some(self.polling_interval_seconds)),
            ("vm_timeout_seconds", Some(self.vm_timeout_seconds)),
            ("capture_timeout_seconds", Some(self.capture_timeout_seconds)),
            ("gallery_timeout_seconds", Some(self.gallery_timeout_seconds)),
            ("delete_timeout_seconds", Some(self.delete_timeout_seconds)),
            ("build_timeout_seconds", self.build_timeout_seconds),
        ];
        for (field, value) in fields {
            let Some(value) = value else { continue };
            if !value.is_finite() || value <= 0.0 || value > MAX_TIMEOUT_SECONDS {
                return Err(BuildError::configuration(format!(
                    "timeouts.{field} must be between 0 and {MAX_TIMEOUT_SECONDS} seconds, got {value}"
                )));
            }
        }
        Ok(())
    }
}

// Negative or NaN inputs collapse to zero instead of panicking.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
