//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request arrives
//!     → timeouts.rs (Deadline for the request)
//!     → upstream call runs inside the deadline (expiry → 504)
//!
//! Health tick
//!     → timeouts.rs (Deadline bounded by the tick interval)
//!     → each probe narrows it to the probe timeout
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries or failover: a failed upstream call is terminal for its request

pub mod timeouts;

pub use timeouts::{Deadline, DeadlineExceeded};
