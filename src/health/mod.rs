//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Snapshot the route table
//!     → Probe each backend concurrently
//!     → Backend::set_alive
//! ```
//!
//! # Design Decisions
//! - The monitor is the only writer of backend liveness
//! - One failed probe marks a backend dead, one passing probe revives it
//! - A dead backend stays in its pool and is skipped by selection
//! - Probe failures never surface as request errors

pub mod active;

pub use active::{HealthMonitor, ProbeFailure};
