//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. Logs go to stderr so
//! that `--json` output on stdout stays machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Pick the effective level.
///
/// Priority: `--log` flag > config `core.log_level` > "info".
/// `RUST_LOG` still wins over all of these inside the filter itself.
pub fn resolve_level<'a>(cli_level: Option<&'a str>, config_level: Option<&'a str>) -> &'a str {
    cli_level
        .filter(|l| LOG_LEVELS.contains(l))
        .or(config_level.filter(|l| LOG_LEVELS.contains(l)))
        .unwrap_or("info")
}

fn build_filter(log_level: &str) -> EnvFilter {
    let default_filter = format!("{},restab_engine={}", log_level, log_level);
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter))
}

/// Initialize the tracing subscriber with the given log level.
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = build_filter(log_level);

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}
