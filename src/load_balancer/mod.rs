//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route resolved → BackendPool identified
//!     → pool.rs (strategy of the pool)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through alive backends)
//!         - least_active.rs (fewest in-flight requests)
//!         - least_latency.rs (lowest average latency)
//!     → backend.rs (track the in-flight request)
//!     → Return backend or Unavailable
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from the round-robin cursor
//! - Dead backends are never removed, only skipped
//! - Ties resolve to pool order so selection is deterministic

use std::sync::Arc;

pub mod backend;
pub mod least_active;
pub mod least_latency;
pub mod pool;
pub mod round_robin;

pub use backend::{ActiveRequestGuard, Backend, HealthState, InvalidBackend};
pub use pool::{BackendPool, Strategy};

/// A backend selection algorithm.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick the next backend, or `None` when no alive backend exists.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
