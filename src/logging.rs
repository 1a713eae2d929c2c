//! Structured logging setup.
//!
//! Logs go to stderr so stdout stays reserved for command output. The
//! filter is read from `RRC_LOG` (same syntax as `RUST_LOG`) and defaults
//! to `info`.

use std::sync::OnceLock;

pub const LOG_ENV: &str = "RRC_LOG";

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    static INIT: OnceLock<()> = OnceLock::new();

    INIT.get_or_init(|| {
        let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".into());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    });
}
