//! Tracing subscriber setup for binaries and long-running hosts.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber. Filtering follows `RUST_LOG`,
/// defaulting to `info`. Set `json` for machine-readable output in
/// production log pipelines.
///
/// Calling this twice is a no-op; the second install attempt is ignored.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
