//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry a deadline from the inbound request into the upstream call
//! - Carry the health tick deadline into each nested probe
//! - Cancel operations cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timer; dropping the wrapped future cancels it
//! - A nested scope can only shorten its parent's deadline, never extend it
//! - Timeout errors are distinct from other errors (504 on the proxy path)

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};

/// The bounded operation ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded after {0:?}")]
pub struct DeadlineExceeded(pub Duration);

/// A point in time after which work on behalf of a request is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    expires_at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            expires_at: started + timeout,
        }
    }

    /// A child scope that expires after `timeout` or with its parent,
    /// whichever comes first.
    pub fn narrow(&self, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            expires_at: self.expires_at.min(now + timeout),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        time::timeout_at(self.expires_at, fut)
            .await
            .map_err(|_| DeadlineExceeded(self.expires_at - self.started))
    }
}
