//! Logging setup for harness processes

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used. The pool
/// logs device state transitions and probe decisions under the
/// `allocator` target, so a directive like `"info,allocator=debug"`
/// drills into allocation behavior without turning everything up.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| {
            crate::Error::Config(format!("invalid log filter {default_level:?}: {e}"))
        })?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}
