//! Tracing initialization.
//!
//! Pretty console output for humans, JSON lines when a machine is reading.
//! `RUST_LOG` overrides the computed filter entirely.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output selection for the global subscriber.
#[derive(Default)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Default the engine's own targets to DEBUG instead of INFO.
    pub verbose: bool,
}

/// Install the global subscriber. Called once from `main`, right after the
/// configuration is assembled.
pub fn init(config: LogConfig) {
    let default_directive = if config.verbose {
        "swapshift=debug"
    } else {
        "swapshift=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}
