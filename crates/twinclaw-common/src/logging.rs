//! Tracing initialization shared by every binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize global tracing for `service_name`.
///
/// Honors `RUST_LOG` if set, otherwise defaults to `info` for the service's
/// own crates and `warn` for dependencies. Set `TWINCLAW_LOG_JSON=1` to
/// switch to structured JSON output for container deployments.
pub fn init_logging(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{service_name}=debug")));

    let json = std::env::var("TWINCLAW_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    tracing::info!(service = service_name, "logging initialized");
}
