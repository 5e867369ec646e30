//! Logging initialization for the gateway.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `ProbeConfig`: JSON lines for production, pretty output for development.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vmprobe_scanner::GeneralConfig;

use crate::error::GatewayError;

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any tracing macros are used. `RUST_LOG`
/// takes precedence over `log_level` when set.
///
/// # Errors
/// Returns [`GatewayError::Tracing`] on an unknown format or when a global
/// subscriber is already installed.
pub fn init_tracing(config: &GeneralConfig) -> Result<(), GatewayError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| GatewayError::Tracing(format!("json subscriber: {e}"))),
        "pretty" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| GatewayError::Tracing(format!("pretty subscriber: {e}"))),
        other => Err(GatewayError::Tracing(format!(
            "unknown log format '{other}', expected 'json' or 'pretty'"
        ))),
    }
}
