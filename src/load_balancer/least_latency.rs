//! Least Latency load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least latency selector.
///
/// Picks the alive backend with the lowest average latency. A backend that
/// has not completed a request yet averages 0 ms and therefore wins until it
/// has traffic of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLatency;

impl LeastLatency {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastLatency {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // `min_by` keeps the first of equal elements
        backends
            .iter()
            .filter(|b| b.is_alive())
            .min_by(|a, b| a.avg_latency_ms().total_cmp(&b.avg_latency_ms()))
            .cloned()
    }
}
