//! Logging initialization
//!
//! All diagnostics go through `tracing`. The binary calls [`init`] once; the
//! library never installs a subscriber on its own.

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Logging profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output on stderr
    Development,
    /// JSON lines on stderr
    Production,
    /// No output; tests that care about logs install their own subscriber
    Test,
}

static INIT_ONCE: Once = Once::new();

/// Build the default filter. `RUST_LOG` wins when it is set.
fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("schemavc=debug")
        } else {
            EnvFilter::new("schemavc=info")
        }
    })
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(profile: Profile, verbose: bool) {
    INIT_ONCE.call_once(|| match profile {
        Profile::Development => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_env_filter(filter(verbose))
                .init();
        }
        Profile::Production => {
            tracing_subscriber::fmt()
                .json()
                .with_writer(std::io::stderr)
                .with_env_filter(filter(verbose))
                .init();
        }
        Profile::Test => {
            tracing_subscriber::registry().init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init(Profile::Test, false);
        init(Profile::Test, true);
        init(Profile::Development, false);
    }
}
