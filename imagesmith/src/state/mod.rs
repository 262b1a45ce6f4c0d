//! Execution state shared across the steps of one build.
//!
//! This module provides:
//! - The [`StateBag`] key/value store with a typed error slot
//! - The well-known [`keys`] steps read and write

mod bag;
pub mod keys;

pub use bag::StateBag;
