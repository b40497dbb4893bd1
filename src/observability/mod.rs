//! Observability for the schema subsystem
//!
//! - Structured logging through `tracing`, one line per event
//! - Typed event names ([`Event`])
//! - Operator alerts ([`AlertNotifier`])
//!
//! Library code only emits through the `tracing` macros. The binary installs
//! the subscriber with [`init_logging`].

mod alerts;
mod events;

pub use alerts::{Alert, AlertKind, AlertNotifier, LogAlertNotifier, MemoryAlertNotifier};
pub use events::Event;

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "dirschema=info";

/// Installs a JSON subscriber on stderr. Safe to call more than once; later
/// calls are ignored.
pub fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("logging subscriber already installed");
    }
}
