//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize subsystems → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close WebSockets, stop sweeper
//!     → Drain HTTP streams (bounded by grace period) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, before a port is bound
//! - Shutdown has a deadline: long media streams do not hold the process

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
