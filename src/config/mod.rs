//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → loader.rs (optional TOML file, then PORT / EMBY_SERVER)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → handed to the HTTP server at startup
//! ```
//!
//! # Design Decisions
//! - Config is read once; the upstream target never changes at runtime
//! - All fields have defaults so the environment alone is a complete config
//! - A missing upstream is fatal before any listener is bound

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AccountingConfig, AdminConfig, ListenerConfig, LogFormat, ObservabilityConfig, RelayConfig,
    TimeoutConfig, UpstreamConfig,
};
