//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! handler produces:
//!     → logging.rs (structured log events, sanitized access log)
//!     → metrics.rs (request counter + latency histogram)
//!
//! executor produces:
//!     → metrics.rs (worker-state gauges, re-derived per scrape)
//!
//! Consumers:
//!     → stdout log aggregation
//!     → Prometheus scrape on the admin listener
//! ```

pub mod logging;
pub mod metrics;
