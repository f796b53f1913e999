//! Logging setup
//!
//! Installs a global `tracing` subscriber: an `EnvFilter` honouring
//! `RUST_LOG` plus a fmt layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::errors::{UeirError, UeirResult};

/// Build the filter from `RUST_LOG`, falling back to `default_filter`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(default_filter: &str) -> UeirResult<()> {
    Registry::default()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| UeirError::Config(format!("logging already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // the first call may race other tests; only the second is certain to fail
        let _ = init_logging("ueir_engine=debug");
        assert!(matches!(init_logging("ueir_engine=debug"), Err(UeirError::Config(_))));
    }
}
