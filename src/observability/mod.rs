//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher, health monitor, rate limiter, admin API produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (Telemetry: counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all request-scoped logs
//! - Telemetry has an explicit install/shutdown lifecycle owned by main

pub mod logging;
pub mod metrics;

pub use self::metrics::{RequestOutcome, Telemetry, TelemetryError};
