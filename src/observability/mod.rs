//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, ISO-8601 timestamps)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (text or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) is attached to every request span
//! - Metrics are cheap no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
