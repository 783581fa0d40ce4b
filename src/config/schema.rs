//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind host and port).
    pub listener: ListenerConfig,

    /// The single upstream media server.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Media stream accounting.
    pub accounting: AccountingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl RelayConfig {
    /// Socket address string the public listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listener.host, self.listener.port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Listen port. Overridden by `PORT`.
    pub port: u16,

    /// Seconds in-flight streams may continue after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_grace_secs: 10,
        }
    }
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream base URL or host. Overridden by `EMBY_SERVER`.
    pub server: Option<String>,

    /// Follow upstream redirects for GET and HEAD instead of passing them on.
    pub follow_redirects: bool,

    /// Keep plain HTTP/WS for an explicit `http://` upstream. Off means the
    /// upstream is always dialed over HTTPS/WSS.
    pub allow_plaintext: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            server: None,
            follow_redirects: true,
            allow_plaintext: false,
        }
    }
}

/// Timeout configuration.
///
/// Proxied requests and bodies have no deadline; media streams may be long-lived.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream TCP/TLS connect timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_secs: 10 }
    }
}

/// Media stream accounting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Meter `video/*` and `audio/*` responses.
    pub enabled: bool,

    /// Records idle longer than this are evicted.
    pub idle_ttl_secs: u64,

    /// Interval of the background eviction sweep.
    pub sweep_interval_secs: u64,

    /// Minimum interval between throughput log lines for one response.
    pub log_interval_ms: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_ttl_secs: 30,
            sweep_interval_secs: 30,
            log_interval_ms: 1000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Line format of log output.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API listener.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
