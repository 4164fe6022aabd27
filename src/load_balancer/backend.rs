//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server, identified by its URL
//! - Track in-flight requests (for Least Active LB)
//! - Accumulate request count and latency (for Least Latency LB)
//! - Track liveness as reported by the health monitor
//!
//! Every field is a lock-free atomic. Liveness is written only by the health
//! monitor, counters only by the dispatcher.

use axum::http::uri::{Authority, Scheme};
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Never probed. Eligible for selection.
    Unknown = 0,
    Alive = 1,
    Dead = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Alive,
            2 => HealthState::Dead,
            _ => HealthState::Unknown,
        }
    }
}

/// Reasons a backend URL is rejected.
#[derive(Debug, Error)]
pub enum InvalidBackend {
    #[error("invalid backend url '{url}': {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("backend url '{0}' must use http or https")]
    Scheme(String),

    #[error("backend url '{0}' has no host")]
    MissingHost(String),
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// The URL as registered, without a trailing slash.
    id: String,
    url: Url,
    /// Pre-calculated URI parts used to rewrite proxied requests.
    scheme: Scheme,
    authority: Authority,

    state: AtomicU8,
    total_requests: AtomicU64,
    total_latency_nanos: AtomicU64,
    active_requests: AtomicI64,
    selections: AtomicU64,
}

impl Backend {
    /// Create a new backend from its target URL.
    pub fn new(raw: &str) -> Result<Self, InvalidBackend> {
        let raw = raw.trim();
        let url = Url::parse(raw).map_err(|source| InvalidBackend::Parse {
            url: raw.to_string(),
            source,
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            _ => return Err(InvalidBackend::Scheme(raw.to_string())),
        };
        if url.host_str().is_none() {
            return Err(InvalidBackend::MissingHost(raw.to_string()));
        }

        let authority = Authority::try_from(&url[url::Position::BeforeHost..url::Position::AfterPort])
            .map_err(|_| InvalidBackend::MissingHost(raw.to_string()))?;

        Ok(Self {
            id: raw.trim_end_matches('/').to_string(),
            url,
            scheme,
            authority,
            state: AtomicU8::new(HealthState::Unknown as u8),
            total_requests: AtomicU64::new(0),
            total_latency_nanos: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            selections: AtomicU64::new(0),
        })
    }

    /// The backend identity, as registered (no trailing slash).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Whether this backend is addressed by `raw`.
    ///
    /// Both sides are compared in parsed form, so `http://h:1` and
    /// `http://h:1/` are the same backend.
    pub fn matches_url(&self, raw: &str) -> bool {
        match Url::parse(raw.trim()) {
            Ok(other) => other == self.url,
            Err(_) => false,
        }
    }

    // --- Liveness ---

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Return true unless the last probe marked this backend dead.
    pub fn is_alive(&self) -> bool {
        self.health_state() != HealthState::Dead
    }

    /// Record the latest probe outcome. Returns the previous state.
    pub fn set_alive(&self, alive: bool) -> HealthState {
        let next = if alive { HealthState::Alive } else { HealthState::Dead };
        HealthState::from(self.state.swap(next as u8, Ordering::AcqRel))
    }

    // --- Counters ---

    /// Count one completed request and add its latency.
    pub fn record_request(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average latency in milliseconds; 0 until the first request completes.
    pub fn avg_latency_ms(&self) -> f64 {
        let requests = self.total_requests.load(Ordering::Relaxed);
        if requests == 0 {
            return 0.0;
        }
        let total = self.total_latency_nanos.load(Ordering::Relaxed);
        total as f64 / 1e6 / requests as f64
    }

    /// Get the current number of in-flight requests.
    pub fn active_requests(&self) -> i64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn inc_active(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active(&self) {
        let prev = self.active_requests.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "active request counter went negative for {}", self.id);
    }

    /// Increment the in-flight counter and return a guard that decrements it
    /// exactly once when dropped.
    pub fn track_active(self: &Arc<Self>) -> ActiveRequestGuard {
        self.inc_active();
        ActiveRequestGuard {
            backend: self.clone(),
        }
    }

    pub(crate) fn record_selection(&self) -> u64 {
        self.selections.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of times a strategy picked this backend.
    pub fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }
}

/// A RAII guard that keeps a request counted as active.
#[derive(Debug)]
pub struct ActiveRequestGuard {
    backend: Arc<Backend>,
}

impl ActiveRequestGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for ActiveRequestGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.backend.dec_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_trims_trailing_slash() {
        let b = Backend::new("http://127.0.0.1:8081/").unwrap();
        assert_eq!(b.id(), "http://127.0.0.1:8081");
        assert_eq!(b.authority().as_str(), "127.0.0.1:8081");
        assert_eq!(b.scheme(), &Scheme::HTTP);
        assert!(b.matches_url("http://127.0.0.1:8081"));
        assert!(!b.matches_url("http://127.0.0.1:8082"));
        assert!(!b.matches_url("not a url"));
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(Backend::new("localhost:8080"), Err(InvalidBackend::Scheme(_))));
        assert!(matches!(Backend::new("ftp://files.local"), Err(InvalidBackend::Scheme(_))));
        assert!(matches!(Backend::new("::::"), Err(InvalidBackend::Parse { .. })));
    }

    #[test]
    fn test_liveness_transitions() {
        let b = Backend::new("http://10.0.0.1:80").unwrap();
        assert_eq!(b.health_state(), HealthState::Unknown);
        assert!(b.is_alive());

        assert_eq!(b.set_alive(false), HealthState::Unknown);
        assert!(!b.is_alive());

        assert_eq!(b.set_alive(true), HealthState::Dead);
        assert_eq!(b.health_state(), HealthState::Alive);
    }

    #[test]
    fn test_average_latency() {
        let b = Backend::new("http://10.0.0.1:80").unwrap();
        assert_eq!(b.avg_latency_ms(), 0.0);

        b.record_request(Duration::from_millis(10));
        b.record_request(Duration::from_millis(30));
        assert_eq!(b.total_requests(), 2);
        assert!((b.avg_latency_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_guard_balances_active_count() {
        let b = Arc::new(Backend::new("http://10.0.0.1:80").unwrap());
        {
            let _g1 = b.track_active();
            let _g2 = b.track_active();
            assert_eq!(b.active_requests(), 2);
        }
        assert_eq!(b.active_requests(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let b = Arc::new(Backend::new("http://10.0.0.1:80").unwrap());
        let inner = b.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.track_active();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert_eq!(b.active_requests(), 0);
    }
}
