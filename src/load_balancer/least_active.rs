//! Least Active load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least active selector.
/// Selects the alive backend with the fewest in-flight requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastActive;

impl LeastActive {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastActive {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // In case of tie, the first one in pool order is selected (stability)
        backends
            .iter()
            .filter(|b| b.is_alive())
            .min_by_key(|b| b.active_requests())
            .cloned()
    }
}
