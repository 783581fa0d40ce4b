//! Upstream media server subsystem.
//!
//! # Data Flow
//! ```text
//! EMBY_SERVER
//!     → target.rs (parse once at startup: scheme + authority)
//!     → client.rs (pooled HTTP(S) client, connect timeout)
//!     → used by the relay for every outbound request and WebSocket dial
//! ```

pub mod client;
pub mod target;

pub use client::{build_client, UpstreamClient};
pub use target::{UpstreamError, UpstreamTarget};
