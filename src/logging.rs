//! `tracing-subscriber` setup shared by all three process roles.

use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, EnvFilter};

/// Install a compact, ANSI-free fmt layer filtered by `RUST_LOG`, falling
/// back to `info` when the variable is unset or invalid. Uses `try_init` so
/// calling it more than once per process (as tests may) is harmless.
///
/// Writes to stderr, never stdout: the detector and device roles use their
/// inherited stdout as the IPC pipe back to the supervisor, and a stray log
/// line there would corrupt the wire codec.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(false)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_target(true);
    let _ = tracing_subscriber::registry().with(stderr).with(filter).try_init();
}
