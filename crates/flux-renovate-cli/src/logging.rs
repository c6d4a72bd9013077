//! Log output setup
//!
//! `RUST_LOG` takes precedence; otherwise `--debug` switches the default
//! level from `info` to `debug`.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

fn default_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::new(level)
}

/// Install the global subscriber, writing to stderr
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

