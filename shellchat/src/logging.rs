//! Diagnostics for shellchat on stderr.
//!
//! Tracing output is separate from the chat on stdout and from the session
//! logs in `logs/` (see `io/session_log`), which are written on every exit
//! regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber. Call once, before anything logs.
///
/// Model requests, confirmations and child processes are traced at `debug`:
///
/// ```bash
/// RUST_LOG=shellchat=debug shellchat --provider ollama 2> shellchat.trace
/// RUST_LOG=shellchat::io::process=debug shellchat --config ./shellchat.toml
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();
}
