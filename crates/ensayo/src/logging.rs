//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; test binaries opt in to
//! output with [`init`].

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "ENSAYO_LOG";

/// Environment variable selecting `json` output
pub const LOG_FORMAT_ENV: &str = "ENSAYO_LOG_FORMAT";

/// Install a subscriber filtered by `ENSAYO_LOG` (default `warn`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    install(filter)
}

/// Install a subscriber with an explicit filter directive
pub fn init_with_filter(directive: &str) -> bool {
    install(EnvFilter::new(directive))
}

fn install(filter: EnvFilter) -> bool {
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_test_writer())
            .with(filter)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_rejected() {
        let _ = init_with_filter("debug");
        assert!(!init_with_filter("info"));
    }
}
