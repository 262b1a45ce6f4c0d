//! Cooperative cancellation for builds.
//!
//! A build owns one [`CancellationToken`]. Every long-running cloud operation
//! races its polling loop against the token, so cancelling the build returns
//! control to the pipeline runner promptly and teardown can begin.

mod token;

pub use token::CancellationToken;
