//! Logging setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` overrides `level` when set. With `json` the output is one JSON
/// object per line. Calling this more than once is harmless: only the first
/// call installs a subscriber.
///
/// Returns true if this call installed the subscriber.
pub fn init_logging(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_line_number(true);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("debug", false);
        assert!(!init_logging("info", true));
    }
}
