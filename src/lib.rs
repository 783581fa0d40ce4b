//! Emby reverse relay library.
//!
//! Forwards every inbound HTTP request and WebSocket session to a single
//! upstream Emby server, rewriting identity headers on the way in, relaxing
//! embedding and CORS restrictions on the way out, and accounting for media
//! bytes as they stream.

pub mod accounting;
pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod upstream;

pub use config::RelayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
