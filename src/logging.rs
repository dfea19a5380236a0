//! Tracing subscriber setup for the CLI.
//!
//! Log lines go to stderr; reports printed by subcommands go to stdout.
//! `RUST_LOG` overrides the verbosity flags entirely.

use tracing_subscriber::EnvFilter;

/// Filter directive for a verbosity level.
///
/// `quiet` wins over `verbose`. Other crates stay at `warn`.
pub fn directive(verbose: u8, quiet: bool) -> String {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    format!("warn,chaos_builder={}", level)
}

/// Install the global subscriber. Call once, before any stage runs.
pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(verbose, quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .without_time()
        .init();
}
