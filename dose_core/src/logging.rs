//! Tracing setup for the `dosewatch` binary and the core test suite.
//!
//! Log lines go to stderr. Stdout carries the command output that the CLI
//! tests assert on, so the two must never mix.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directive used when `RUST_LOG` is unset
///
/// Verbose mode only raises this workspace's crates to debug, so per-user
/// tick logging shows without dependency noise.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,dose_core=debug,dose_cli=debug"
    } else {
        "info"
    }
}

/// Install the global subscriber; `RUST_LOG` wins over `verbose`
///
/// Calling this twice is harmless: the second install is ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(verbose)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("dose_core=debug"))
        .try_init();
}
