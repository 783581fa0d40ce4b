//! Structured logging.
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level; timestamps are RFC 3339 in UTC.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Default filter directives for a configured level.
pub fn default_directives(level: &str) -> String {
    format!("emby_relay={level},relay_cli={level},tower_http={level}")
}

/// Initialize the global subscriber. Must be called once, before serving.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_relay_and_tower() {
        let directives = default_directives("debug");
        assert!(directives.contains("emby_relay=debug"));
        assert!(directives.contains("tower_http=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
