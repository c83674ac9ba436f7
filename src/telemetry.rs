//! Structured logging setup
//!
//! Configures tracing-subscriber with an `EnvFilter`. `RUST_LOG` wins over the
//! configured level when set.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter directive used when `RUST_LOG` is unset
pub fn default_directive(level: &str) -> String {
    format!("chat_relay={},tower_http=debug", level)
}

/// Initialize the global tracing subscriber
///
/// Only the first call per process has any effect.
///
/// ```no_run
/// chat_relay::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_crate_and_tower_http() {
        assert_eq!(default_directive("warn"), "chat_relay=warn,tower_http=debug");
    }

    #[test]
    fn test_default_directive_parses_as_filter() {
        assert!(EnvFilter::try_new(default_directive("debug")).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("info");
        init("debug");
        tracing::info!("telemetry initialized");
    }
}
