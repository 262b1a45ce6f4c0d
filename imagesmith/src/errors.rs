//! Error types for image builds.
//!
//! Two layers of errors exist: [`CloudError`] is what the cloud client facade
//! reports for a single remote call, and [`BuildError`] is what a step records
//! in the build state when it halts the pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the cloud client facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The request never reached the provider, or authentication failed.
    #[error("transport error during {operation}: {message}")]
    Transport {
        /// The operation being attempted.
        operation: String,
        /// Transport diagnostic.
        message: String,
    },

    /// The provider rejected or failed the operation.
    #[error("{operation} failed: {code}: {message}")]
    Remote {
        /// The operation being attempted.
        operation: String,
        /// Provider error code.
        code: String,
        /// Provider error message.
        message: String,
        /// Raw diagnostic payload returned by the provider, kept verbatim.
        details: Option<String>,
    },

    /// The addressed resource does not exist.
    #[error("{resource} was not found")]
    NotFound {
        /// The resource that was looked up.
        resource: String,
    },

    /// The caller's cancellation token fired while waiting.
    #[error("{operation} was cancelled: {reason}")]
    Cancelled {
        /// The operation being waited on.
        operation: String,
        /// The cancellation reason.
        reason: String,
    },

    /// The operation did not reach a terminal state before its deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    TimedOut {
        /// The operation being waited on.
        operation: String,
        /// The deadline that elapsed.
        after: Duration,
    },
}

impl CloudError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a remote failure without a diagnostic payload.
    #[must_use]
    pub fn remote(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Remote {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timed_out(operation: impl Into<String>, after: Duration) -> Self {
        Self::TimedOut {
            operation: operation.into(),
            after,
        }
    }

    /// Returns true for "the resource is already gone" errors.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true when the caller gave up waiting rather than the provider refusing.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }
}

/// Coarse classification of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Inconsistent or missing inputs; no remote call was attempted.
    Configuration,
    /// The provider rejected or failed an operation.
    Remote,
    /// The build was cancelled or an operation deadline elapsed.
    Cancellation,
    /// A defect inside the builder itself.
    Internal,
}

/// The error recorded in the build state when a step halts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Mutually exclusive or otherwise inconsistent inputs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A step needed a state entry that no predecessor wrote.
    #[error("required build state '{key}' is missing")]
    MissingState {
        /// The missing key.
        key: String,
    },

    /// A state entry holds a value of the wrong shape.
    #[error("build state '{key}' is not a valid {expected}: {message}")]
    StateType {
        /// The offending key.
        key: String,
        /// The expected type.
        expected: String,
        /// Decoder diagnostic.
        message: String,
    },

    /// A remote operation failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The build was cancelled between steps.
    #[error("build cancelled: {0}")]
    Cancelled(String),

    /// A step misbehaved (for example, panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a missing-state error.
    #[must_use]
    pub fn missing_state(key: impl Into<String>) -> Self {
        Self::MissingState { key: key.into() }
    }

    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) | Self::MissingState { .. } | Self::StateType { .. } => {
                ErrorClass::Configuration
            }
            Self::Cloud(err) if err.is_cancellation() => ErrorClass::Cancellation,
            Self::Cloud(_) => ErrorClass::Remote,
            Self::Cancelled(_) => ErrorClass::Cancellation,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Returns true if the build gave up rather than being refused.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.class() == ErrorClass::Cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_keeps_details() {
        let err = CloudError::Remote {
            operation: "gallery_image_versions.create".to_string(),
            code: "OperationNotAllowed".to_string(),
            message: "quota exceeded".to_string(),
            details: Some(r#"{"error":{"code":"OperationNotAllowed"}}"#.to_string()),
        };

        assert!(err.to_string().contains("OperationNotAllowed"));
        assert!(err.to_string().contains("quota exceeded"));
        if let CloudError::Remote { details, .. } = &err {
            assert!(details.as_deref().unwrap_or_default().contains("\"code\""));
        }
    }

    #[test]
    fn test_timeout_display() {
        let err = CloudError::timed_out("virtual_machines.create", Duration::from_secs(90));
        assert_eq!(err.to_string(), "virtual_machines.create timed out after 90s");
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            BuildError::configuration("both inputs present").class(),
            ErrorClass::Configuration
        );
        assert_eq!(BuildError::missing_state("location").class(), ErrorClass::Configuration);
        assert_eq!(
            BuildError::from(CloudError::remote("op", "Conflict", "nope")).class(),
            ErrorClass::Remote
        );
        assert_eq!(
            BuildError::from(CloudError::cancelled("op", "user abort")).class(),
            ErrorClass::Cancellation
        );
        assert_eq!(
            BuildError::from(CloudError::timed_out("op", Duration::from_secs(1))).class(),
            ErrorClass::Cancellation
        );
        assert_eq!(BuildError::Cancelled("ctrl-c".into()).class(), ErrorClass::Cancellation);
        assert_eq!(BuildError::Internal("panic".into()).class(), ErrorClass::Internal);
    }

    #[test]
    fn test_cloud_error_transparent() {
        let cloud = CloudError::not_found("image version 1.0.0");
        let build = BuildError::from(cloud.clone());
        assert_eq!(build.to_string(), cloud.to_string());
        assert!(cloud.is_not_found());
        assert!(!cloud.is_cancellation());
    }
}
