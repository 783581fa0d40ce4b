//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable holding the listen port.
pub const ENV_PORT: &str = "PORT";

/// Environment variable holding the upstream base URL.
pub const ENV_UPSTREAM: &str = "EMBY_SERVER";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { name: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { name, value } => {
                write!(f, "Invalid value for {}: {:?}", name, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from an optional TOML file, apply the process
/// environment on top, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let config = match path {
        Some(path) => load_file(path)?,
        None => RelayConfig::default(),
    };

    let config = apply_env(config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML configuration file without validating it.
pub fn load_file(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Overlay `PORT` and `EMBY_SERVER` onto `config`.
///
/// `lookup` resolves a variable name; empty values count as unset.
pub fn apply_env<F>(mut config: RelayConfig, lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = lookup(ENV_PORT) {
        config.listener.port = port.trim().parse().map_err(|_| ConfigError::Env {
            name: ENV_PORT,
            value: port.clone(),
        })?;
    }

    if let Some(server) = lookup(ENV_UPSTREAM) {
        config.upstream.server = Some(server.trim().to_string());
    }

    Ok(config)
}
