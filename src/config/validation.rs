//! Configuration validation.
//!
//! Semantic checks run after serde has handled the syntax. All problems are
//! collected so a misconfigured deployment reports everything at once.

use crate::config::schema::RelayConfig;
use crate::upstream::UpstreamTarget;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.upstream.server.as_deref() {
        None => errors.push(ValidationError::new(
            "upstream.server",
            "upstream is not set (export EMBY_SERVER)",
        )),
        Some(server) => {
            if let Err(e) = UpstreamTarget::parse_with(server, config.upstream.allow_plaintext) {
                errors.push(ValidationError::new("upstream.server", e.to_string()));
            }
        }
    }

    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }
    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }

    let accounting = &config.accounting;
    if accounting.enabled {
        if accounting.idle_ttl_secs == 0 {
            errors.push(ValidationError::new("accounting.idle_ttl_secs", "must be greater than 0"));
        }
        if accounting.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("accounting.sweep_interval_secs", "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
        }
        if config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("invalid socket address {:?}", config.admin.bind_address),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
