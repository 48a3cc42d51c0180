//! Diagnostic logging setup.
//!
//! Library code logs through `tracing` macros; the binary calls [`init`] once.
//! Output goes to stderr so stdout stays free for handler output.

use tracing_subscriber::EnvFilter;

/// Environment variable holding an explicit filter, e.g. `spindle=debug`.
pub const LOG_ENV: &str = "SPINDLE_LOG";

/// Install the global subscriber. `verbosity` is the count of `-v` flags.
pub fn init(verbosity: u8) {
    let fallback = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
