//! Logging and operator output.

mod logging;
mod ui;

pub use logging::init_logging;
pub use ui::{TracingUi, Ui};
