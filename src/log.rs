//! Logging setup for the runtime.
//!
//! Two ingredients: a `tracing_log::LogTracer` so that any dependency still
//! emitting through the `log` facade shows up in our subscriber, and an
//! `EnvFilter`-driven `tracing_subscriber::fmt` subscriber so
//! `RUST_LOG=nuclear=debug` selects log output the way `RUST_LOG` filters
//! do for any `tracing`-based binary.

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Initialise process-wide logging.
///
/// `level` is used as the default filter directive when `RUST_LOG` is not
/// set in the environment. Calling this more than once is a no-op after the
/// first call succeeds; the runtime's own `log<Level>(...)` forwarding (see
/// [`crate::powerplant::PowerPlant::log`]) goes through the `tracing` macros
/// this sets up as the global default.
pub fn init(level: &str) {
    let _ = LogTracer::init();

    let builder = tracing_subscriber::fmt::Subscriber::builder();
    let subscriber = match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).finish(),
        Err(_) => builder.with_env_filter(level).finish(),
    };

    // Another powerplant-in-process or a test harness may have already
    // installed a subscriber; that is not a configuration error.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
