//! Tracing bootstrap for hosts that do not install their own subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a compact `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `dmapi=debug` with `debug`, or
/// `dmapi=info`. Does nothing if a global subscriber already exists.
pub fn init_tracing(debug: bool) {
    let default = if debug { "dmapi=debug" } else { "dmapi=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
