//! Diagnostic logging to stderr.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "TREECHECK_LOG";

static INIT: Once = Once::new();

/// Default filter when `TREECHECK_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "error" }
}

/// Install the global subscriber.
///
/// `--verbose` takes precedence over `TREECHECK_LOG`. Calling this more
/// than once has no effect.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let filter = if verbose {
            EnvFilter::new(default_directive(true))
        } else {
            EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| EnvFilter::new(default_directive(false)))
        };

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "debug");
        assert_eq!(default_directive(false), "error");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
    }
}
