//! HTTP and WebSocket relay subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → connection.rs classify: WebSocket upgrade or plain HTTP
//!         WebSocket → websocket.rs (dial upstream, pump frames both ways)
//!         HTTP      → request.rs (rewrite headers, forward body)
//!                   → upstream client
//!                   → response.rs (strip headers, add CORS)
//!                   → accounting MeteredBody for media
//!     → Send to client
//! ```

pub mod connection;
pub mod error;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use connection::{RelayPhase, RelayTracker};
pub use error::RelayError;
pub use server::{AppState, HttpServer};
