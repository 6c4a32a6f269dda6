//! Tracing subscriber setup shared by the binaries.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "MEDWIZ_LOG";

/// Installs a stderr subscriber filtered by `MEDWIZ_LOG` (default `info`).
///
/// Stdout stays free for the demo narration. Calling this twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
