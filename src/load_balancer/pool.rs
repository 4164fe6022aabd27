//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered backends serving one route
//! - Apply the pool's load balancing strategy to select a backend
//! - Build updated copies for admin mutations without disturbing readers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use crate::load_balancer::{
    backend::{Backend, InvalidBackend},
    least_active::LeastActive,
    least_latency::LeastLatency,
    round_robin::RoundRobin,
    LoadBalancer,
};

/// Backend selection strategy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastLatency,
    LeastActive,
}

impl Strategy {
    /// Parse a strategy token, case-insensitively.
    /// Unrecognized or empty input falls back to round robin.
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "least_active" => Strategy::LeastActive,
            "least_latency" => Strategy::LeastLatency,
            _ => Strategy::RoundRobin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastLatency => "least_latency",
            Strategy::LeastActive => "least_active",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backends serving one route plus their selection strategy.
///
/// A pool is never mutated once it is visible to readers. Admin operations
/// build a new pool with [`BackendPool::with_backends`] or
/// [`BackendPool::with_strategy`] and swap it into the route table.
#[derive(Debug, Clone)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    strategy: Strategy,
    round_robin: RoundRobin,
}

impl BackendPool {
    pub fn new(backends: Vec<Arc<Backend>>, strategy: Strategy) -> Self {
        Self {
            backends,
            strategy,
            round_robin: RoundRobin::new(),
        }
    }

    /// Create a pool from backend URLs. Fails on the first invalid URL.
    pub fn from_urls<S: AsRef<str>>(urls: &[S], strategy: Strategy) -> Result<Self, InvalidBackend> {
        let backends = urls
            .iter()
            .map(|u| Backend::new(u.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(backends, strategy))
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Select a backend with the pool's strategy.
    /// Returns `None` when the pool is empty or every backend is dead.
    pub fn select(&self) -> Option<Arc<Backend>> {
        let picked = self.balancer().next_server(&self.backends)?;
        picked.record_selection();
        Some(picked)
    }

    fn balancer(&self) -> &dyn LoadBalancer {
        match self.strategy {
            Strategy::RoundRobin => &self.round_robin,
            Strategy::LeastActive => &LeastActive,
            Strategy::LeastLatency => &LeastLatency,
        }
    }

    /// Copy of this pool with a different backend sequence.
    /// The rotation cursor carries over.
    pub fn with_backends(&self, backends: Vec<Arc<Backend>>) -> Self {
        Self {
            backends,
            strategy: self.strategy,
            round_robin: self.round_robin.clone(),
        }
    }

    /// Copy of this pool with a different strategy, same backends.
    pub fn with_strategy(&self, strategy: Strategy) -> Self {
        Self {
            backends: self.backends.clone(),
            strategy,
            round_robin: self.round_robin.clone(),
        }
    }

    /// Backend identities in pool order.
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(Strategy::parse("least_active"), Strategy::LeastActive);
        assert_eq!(Strategy::parse("LEAST_LATENCY"), Strategy::LeastLatency);
        assert_eq!(Strategy::parse("Round_Robin"), Strategy::RoundRobin);
        assert_eq!(Strategy::parse(""), Strategy::RoundRobin);
        assert_eq!(Strategy::parse("weighted"), Strategy::RoundRobin);
        assert_eq!(Strategy::LeastActive.to_string(), "least_active");
    }

    #[test]
    fn test_empty_pool_is_unavailable() {
        let pool = BackendPool::new(Vec::new(), Strategy::LeastActive);
        assert!(pool.is_empty());
        assert!(pool.select().is_none());
    }

    #[test]
    fn test_select_counts_selections() {
        let pool = BackendPool::from_urls(&["http://10.0.0.1:80", "http://10.0.0.2:80"], Strategy::RoundRobin)
            .unwrap();
        for _ in 0..4 {
            pool.select().unwrap();
        }
        assert!(pool.backends().iter().all(|b| b.selections() == 2));
    }

    #[test]
    fn test_from_urls_rejects_invalid() {
        let result = BackendPool::from_urls(&["http://ok:80", "nope"], Strategy::RoundRobin);
        assert!(result.is_err());
    }

    #[test]
    fn test_with_strategy_keeps_backends() {
        let pool = BackendPool::from_urls(&["http://10.0.0.1:80", "http://10.0.0.2:80"], Strategy::RoundRobin)
            .unwrap();
        pool.backends()[1].inc_active();

        let updated = pool.with_strategy(Strategy::LeastActive);
        assert_eq!(updated.strategy(), Strategy::LeastActive);
        assert!(Arc::ptr_eq(&pool.backends()[0], &updated.backends()[0]));
        assert_eq!(updated.select().unwrap().id(), "http://10.0.0.1:80");
    }

    #[test]
    fn test_rotation_continues_after_append() {
        let pool = BackendPool::from_urls(&["http://a:80", "http://b:80"], Strategy::RoundRobin).unwrap();
        assert_eq!(pool.select().unwrap().id(), "http://a:80");

        let mut backends = pool.backends().to_vec();
        backends.push(Arc::new(Backend::new("http://c:80").unwrap()));
        let grown = pool.with_backends(backends);

        assert_eq!(grown.select().unwrap().id(), "http://b:80");
        assert_eq!(grown.select().unwrap().id(), "http://c:80");
        assert_eq!(grown.select().unwrap().id(), "http://a:80");
    }
}
