//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (RouteTable, shared read lock)
//!     → matcher.rs (segment trie, longest prefix)
//!     → Return: matched prefix + BackendPool, or NoMatch
//!
//! Admin mutation:
//!     add / remove backend, update route
//!     → router.rs (exclusive write lock)
//!     → build replacement BackendPool
//!     → swap it into the trie
//! ```
//!
//! # Design Decisions
//! - Routes are seeded from config, then mutable through admin operations
//! - No regex in hot path (segment prefix matching only)
//! - Deterministic: most specific prefix wins, independent of insert order
//! - Explicit NoMatch rather than silent default

pub mod matcher;
pub mod router;

pub use router::{AddBackendOutcome, ResolvedRoute, RouteError, RouteInfo, RouteTable, RouteUpdate};
