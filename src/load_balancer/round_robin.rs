//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Round-robin selector.
///
/// The rotation cursor is shared between clones so a pool rebuilt by an
/// admin update keeps rotating from where it left off.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    cursor: Arc<AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor position (number of increments so far).
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let len = backends.len();
        if len == 0 {
            return None;
        }

        // Every attempt takes a fresh increment so concurrent callers never
        // share a slot; give up after one full lap of dead backends.
        for _ in 0..len {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let backend = &backends[index];
            if backend.is_alive() {
                return Some(backend.clone());
            }
        }
        None
    }
}
