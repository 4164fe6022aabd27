//! Security subsystem.
//!
//! # Responsibilities
//! - Per-client admission control in front of the proxy path

pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter};
