//! Route table and administrative mutation.
//!
//! # Responsibilities
//! - Store the prefix → backend pool mapping
//! - Resolve request paths to the most specific route
//! - Apply admin mutations (add/remove backend, update route)
//!
//! # Design Decisions
//! - One reader/writer lock guards the whole table; resolution takes the
//!   read side, mutations the write side
//! - Pools are immutable once published. Mutations build a replacement pool
//!   and swap the `Arc`, so a reader holding an old pool never sees a half
//!   applied update and no lock is held across network I/O
//! - Nothing under the write lock blocks or allocates beyond the new pool

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::config::RouteConfig;
use crate::load_balancer::{Backend, BackendPool, InvalidBackend, Strategy};
use crate::routing::matcher::{normalize_prefix, PrefixTrie};

/// Errors from route table operations.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error(transparent)]
    InvalidBackend(#[from] InvalidBackend),
}

/// A successfully resolved request path.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// The registered prefix that matched.
    pub prefix: String,
    pub pool: Arc<BackendPool>,
}

/// Route summary returned by [`RouteTable::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub prefix: String,
    pub strategy: Strategy,
    pub backends: Vec<String>,
}

/// Result of [`RouteTable::add_backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBackendOutcome {
    /// The prefix was new; a one-backend pool was created.
    CreatedRoute,
    /// The backend was appended to the existing pool.
    Appended,
}

/// Result of [`RouteTable::update_route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteUpdate {
    pub backends_replaced: bool,
    /// `(from, to)` when the strategy actually changed.
    pub strategy_change: Option<(Strategy, Strategy)>,
}

/// Concurrency-guarded mapping from path prefix to backend pool.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<PrefixTrie<Arc<BackendPool>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table from the startup configuration.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let table = Self::new();
        for route in routes {
            let strategy = Strategy::parse(route.strategy.as_deref().unwrap_or_default());
            let pool = BackendPool::from_urls(&route.backends, strategy)?;
            tracing::info!(
                prefix = %normalize_prefix(&route.prefix),
                backends = pool.len(),
                strategy = %strategy,
                "Route registered"
            );
            table.insert(&route.prefix, pool);
        }
        Ok(table)
    }

    // A writer that panicked cannot leave a pool half-built (pools are
    // swapped whole), so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, PrefixTrie<Arc<BackendPool>>> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PrefixTrie<Arc<BackendPool>>> {
        self.routes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a request path to its most specific route.
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        let routes = self.read();
        routes.longest_match(path).map(|(prefix, pool)| ResolvedRoute {
            prefix,
            pool: pool.clone(),
        })
    }

    /// Register or replace the pool for a prefix.
    pub fn insert(&self, prefix: &str, pool: BackendPool) {
        self.write().insert(prefix, Arc::new(pool));
    }

    /// Current pool for an exact prefix.
    pub fn get(&self, prefix: &str) -> Option<Arc<BackendPool>> {
        self.read().get(prefix).cloned()
    }

    /// Add a backend to a route, creating the route if needed.
    ///
    /// `strategy` only applies when the route is created; appending to an
    /// existing route leaves its strategy untouched.
    pub fn add_backend(&self, prefix: &str, url: &str, strategy: Strategy) -> Result<AddBackendOutcome, RouteError> {
        let backend = Arc::new(Backend::new(url)?);
        let prefix = normalize_prefix(prefix);

        let mut routes = self.write();
        match routes.get_mut(&prefix) {
            Some(pool) => {
                let mut backends = pool.backends().to_vec();
                backends.push(backend);
                *pool = Arc::new(pool.with_backends(backends));
                tracing::info!(prefix = %prefix, backend = %url, "Added backend to route");
                Ok(AddBackendOutcome::Appended)
            }
            None => {
                routes.insert(&prefix, Arc::new(BackendPool::new(vec![backend], strategy)));
                tracing::info!(prefix = %prefix, backend = %url, strategy = %strategy, "Created route");
                Ok(AddBackendOutcome::CreatedRoute)
            }
        }
    }

    /// Remove every backend addressed by `url` from a route.
    ///
    /// No-op when the route or backend is absent. Returns how many backends
    /// were removed. The pool may end up empty, which is still valid.
    pub fn remove_backend(&self, prefix: &str, url: &str) -> usize {
        let mut routes = self.write();
        let Some(pool) = routes.get_mut(prefix) else {
            tracing::debug!(prefix = %prefix, "Remove backend: route does not exist");
            return 0;
        };

        let remaining: Vec<_> = pool
            .backends()
            .iter()
            .filter(|b| !b.matches_url(url))
            .cloned()
            .collect();
        let removed = pool.len() - remaining.len();
        if removed > 0 {
            *pool = Arc::new(pool.with_backends(remaining));
            tracing::info!(prefix = %prefix, backend = %url, "Removed backend from route");
        }
        removed
    }

    /// Replace a route's backends and/or strategy.
    ///
    /// An empty `backends` slice keeps the current backends; `None` or an
    /// empty strategy keeps the current strategy.
    pub fn update_route<S: AsRef<str>>(
        &self,
        prefix: &str,
        backends: &[S],
        strategy: Option<&str>,
    ) -> Result<RouteUpdate, RouteError> {
        // Build new backends before taking the lock.
        let replacement = if backends.is_empty() {
            None
        } else {
            Some(
                backends
                    .iter()
                    .map(|u| Backend::new(u.as_ref()).map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        };
        let requested = strategy
            .filter(|s| !s.trim().is_empty())
            .map(Strategy::parse);

        let mut routes = self.write();
        let pool = routes
            .get_mut(prefix)
            .ok_or_else(|| RouteError::RouteNotFound(normalize_prefix(prefix)))?;

        let mut update = RouteUpdate::default();
        let mut next = (**pool).clone();
        if let Some(backends) = replacement {
            next = next.with_backends(backends);
            update.backends_replaced = true;
        }
        if let Some(strategy) = requested {
            let current = next.strategy();
            if current != strategy {
                next = next.with_strategy(strategy);
                update.strategy_change = Some((current, strategy));
            }
        }
        *pool = Arc::new(next);

        tracing::info!(
            prefix = %normalize_prefix(prefix),
            backends_replaced = update.backends_replaced,
            strategy_changed = update.strategy_change.is_some(),
            "Route updated"
        );
        Ok(update)
    }

    /// Snapshot of every route, sorted by prefix.
    pub fn list(&self) -> Vec<RouteInfo> {
        self.read()
            .entries()
            .into_iter()
            .map(|(prefix, pool)| RouteInfo {
                prefix,
                strategy: pool.strategy(),
                backends: pool.backend_ids(),
            })
            .collect()
    }

    /// Copy of the current prefix → pool mapping.
    ///
    /// Only the copy is made under the read lock; callers can then do slow
    /// work (health probes) against the snapshot.
    pub fn snapshot(&self) -> Vec<(String, Arc<BackendPool>)> {
        self.read()
            .entries()
            .into_iter()
            .map(|(prefix, pool)| (prefix, pool.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
