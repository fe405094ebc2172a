//! Tracing setup for the command-line tool.
//!
//! Diagnostics go to stderr so command output on stdout stays clean. The
//! filter honors `RUST_LOG`; without it the level is `info`, or `debug` when
//! verbose output is requested.

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(verbose: bool) {
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let subscriber = Registry::default().with(build_env_filter(verbose)).with(layer);
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::debug!(verbose, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_lowers_default_level() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init(false);
        init(true);
        tracing::info!("still logging");
    }
}
