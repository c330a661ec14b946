//! # cashy-logging
//!
//! Subscriber setup for the `tracing` events emitted by the cashy crates.
//!
//! Library crates only emit events; binaries and tests decide where they go:
//!
//! - [`init_subscriber`] installs a global stderr subscriber filtered by
//!   `RUST_LOG` (falling back to the given level).
//! - [`test_utils::capture_logs`] installs a thread-local subscriber that
//!   records events in memory so tests can assert on them.

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Install the global stderr subscriber.
///
/// `RUST_LOG` wins over `level` when set. Only the first call installs
/// anything; later calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}
