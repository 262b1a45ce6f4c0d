//! Polling of long-running operations.
//!
//! The provider answers mutating calls with an operation handle. Waiting on it
//! means probing its status at a fixed interval until it reaches a terminal
//! state, the deadline passes, or the build is cancelled. Cancellation is raced
//! against both the probe and the sleep, so an in-flight wait returns as soon as
//! the token fires rather than at the next interval.

use crate::cancellation::CancellationToken;
use crate::errors::CloudError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Status reported by one poll of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Not finished yet.
    InProgress,
    /// Finished successfully, optionally naming the resulting resource.
    Succeeded {
        /// Resource id produced by the operation.
        resource_id: Option<String>,
    },
    /// Finished unsuccessfully.
    Failed {
        /// Provider error code.
        code: String,
        /// Provider error message.
        message: String,
        /// Verbatim diagnostic payload.
        details: Option<String>,
    },
}

/// A handle to a remote operation that must be polled for completion.
#[async_trait]
pub trait LongRunningOperation: Send + Sync {
    /// Short description used in errors and logs, e.g. `virtual_machines.create`.
    fn description(&self) -> &str;

    /// Fetches the current status.
    async fn poll(&self) -> Result<OperationStatus, CloudError>;
}

/// Boxed operation handle.
pub type Operation = Box<dyn LongRunningOperation>;

/// Interval and deadline for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between polls.
    pub interval: Duration,
    /// Overall deadline.
    pub timeout: Duration,
}

impl PollOptions {
    /// Creates poll options.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Deadline used when `start + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Runs `work` unless `cancel` fires first.
///
/// Starting a remote operation is itself a network round trip, so the
/// `begin_*` calls race the token the same way polling does.
///
/// # Errors
///
/// Returns `CloudError::Cancelled`, or whatever `work` returns.
pub async fn cancellable<T, Fut>(
    operation: &str,
    cancel: &CancellationToken,
    work: Fut,
) -> Result<T, CloudError>
where
    Fut: Future<Output = Result<T, CloudError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CloudError::cancelled(
            operation,
            cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        )),
        result = work => result,
    }
}

/// Result of one probe in [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Keep waiting.
    Pending,
    /// Terminal value.
    Ready(T),
}

/// Repeatedly runs `probe` until it is ready, the deadline passes, or `cancel` fires.
///
/// # Errors
///
/// Returns the probe's own error, `CloudError::TimedOut`, or `CloudError::Cancelled`.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    options: PollOptions,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, CloudError>>,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(options.timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let cancelled = || {
        CloudError::cancelled(
            operation,
            cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        )
    };
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled()),
            result = tokio::time::timeout_at(deadline, probe()) => match result {
                Ok(result) => result?,
                Err(_) => return Err(CloudError::timed_out(operation, options.timeout)),
            },
        };

        if let Probe::Ready(value) = outcome {
            debug!(operation, attempts, "Operation reached a terminal state");
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CloudError::timed_out(operation, options.timeout));
        }

        let pause = options.interval.min(deadline - now);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled()),
            () = tokio::time::sleep(pause) => {}
        }
    }
}

/// Waits for `op` to finish and returns the resource id it reported.
///
/// # Errors
///
/// A `Failed` status becomes `CloudError::Remote` with the diagnostic kept intact.
pub async fn wait_for_completion(
    op: &dyn LongRunningOperation,
    options: PollOptions,
    cancel: &CancellationToken,
) -> Result<Option<String>, CloudError> {
    let description = op.description().to_string();
    let name = description.as_str();
    poll_until(name, options, cancel, move || async move {
        match op.poll().await? {
            OperationStatus::InProgress => Ok(Probe::Pending),
            OperationStatus::Succeeded { resource_id } => Ok(Probe::Ready(resource_id)),
            OperationStatus::Failed {
                code,
                message,
                details,
            } => Err(CloudError::Remote {
                operation: name.to_string(),
                code,
                message,
                details,
            }),
        }
    })
    .await
}
