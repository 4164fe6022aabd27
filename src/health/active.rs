//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend of every route
//! - Update backend liveness based on results
//!
//! Each tick takes a snapshot of the route table, so the table lock is held
//! only for the copy. Probes for one tick run concurrently and each is bound
//! by the tick's deadline narrowed to the probe timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::http::request::REQUEST_ID_HEADER;
use crate::load_balancer::{Backend, HealthState};
use crate::observability::Telemetry;
use crate::resilience::Deadline;
use crate::routing::RouteTable;

/// Why a probe counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Status(StatusCode),
    Connect(String),
    Timeout,
    InvalidRequest(String),
}

pub struct HealthMonitor {
    routes: Arc<RouteTable>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
    telemetry: Arc<Telemetry>,
}

impl HealthMonitor {
    pub fn new(routes: Arc<RouteTable>, config: HealthCheckConfig, telemetry: Arc<Telemetry>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            routes,
            config,
            client,
            telemetry,
        }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval(interval);
        // A slow tick must not cause a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tick = Deadline::after(interval);
                    // Dropping the probes on shutdown aborts stalled connections.
                    tokio::select! {
                        _ = self.check_all_within(tick) => {}
                        _ = shutdown.recv() => {
                            tracing::info!("Health monitor received shutdown signal during checks");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once and apply the results.
    pub async fn check_all(&self) {
        self.check_all_within(Deadline::after(self.probe_timeout())).await;
    }

    async fn check_all_within(&self, tick: Deadline) {
        let snapshot = self.routes.snapshot();

        let probes = snapshot.iter().flat_map(|(prefix, pool)| {
            pool.backends()
                .iter()
                .map(move |backend| self.check_backend(prefix, backend, tick))
        });
        join_all(probes).await;
    }

    async fn check_backend(&self, prefix: &str, backend: &Arc<Backend>, tick: Deadline) {
        let started = Instant::now();
        let result = self.probe(backend, tick.narrow(self.probe_timeout())).await;
        let alive = result.is_ok();

        let previous = backend.set_alive(alive);
        self.telemetry
            .record_backend_health(prefix, backend, alive, started.elapsed());

        match (&result, previous) {
            (Ok(()), HealthState::Dead) => {
                tracing::info!(route = %prefix, backend = %backend.id(), "Backend is alive again");
            }
            (Err(failure), HealthState::Alive | HealthState::Unknown) => {
                tracing::warn!(route = %prefix, backend = %backend.id(), reason = ?failure, "Backend marked dead");
            }
            (Err(failure), HealthState::Dead) => {
                tracing::debug!(route = %prefix, backend = %backend.id(), reason = ?failure, "Backend still dead");
            }
            _ => {}
        }
    }

    /// `GET <backend><path>`. Alive only on a 200 within the deadline.
    async fn probe(&self, backend: &Backend, deadline: Deadline) -> Result<(), ProbeFailure> {
        let uri = probe_uri(backend, &self.config.path);
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::USER_AGENT, "prefix-lb-health-check")
            .header(REQUEST_ID_HEADER, uuid::Uuid::new_v4().to_string())
            .body(Body::empty())
            .map_err(|e| ProbeFailure::InvalidRequest(e.to_string()))?;

        match deadline.run(self.client.request(request)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => Ok(()),
            Ok(Ok(response)) => Err(ProbeFailure::Status(response.status())),
            Ok(Err(e)) => Err(ProbeFailure::Connect(e.to_string())),
            Err(_) => Err(ProbeFailure::Timeout),
        }
    }
}

fn probe_uri(backend: &Backend, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", backend.id(), path)
    } else {
        format!("{}/{}", backend.id(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{BackendPool, Strategy};
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU16, Ordering};

    async fn spawn_health_server(status: Arc<AtomicU16>) -> SocketAddr {
        let app = Router::new().route(
            "/health",
            get(move || {
                let status = status.clone();
                async move { StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap() }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn monitor(routes: Arc<RouteTable>) -> HealthMonitor {
        let config = HealthCheckConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        HealthMonitor::new(routes, config, Arc::new(Telemetry::disabled()))
    }

    #[test]
    fn test_probe_uri() {
        let backend = Backend::new("http://127.0.0.1:9000/").unwrap();
        assert_eq!(probe_uri(&backend, "/health"), "http://127.0.0.1:9000/health");
        assert_eq!(probe_uri(&backend, "ready"), "http://127.0.0.1:9000/ready");
    }

    #[tokio::test]
    async fn test_transitions_follow_probe_results() {
        let status = Arc::new(AtomicU16::new(200));
        let addr = spawn_health_server(status.clone()).await;

        let routes = Arc::new(RouteTable::new());
        let healthy = format!("http://{}", addr);
        routes.insert(
            "/api",
            BackendPool::from_urls(&[healthy.as_str(), "http://127.0.0.1:1"], Strategy::RoundRobin).unwrap(),
        );
        let pool = routes.get("/api").unwrap();
        let monitor = monitor(routes.clone());

        monitor.check_all().await;
        assert_eq!(pool.backends()[0].health_state(), HealthState::Alive);
        assert_eq!(pool.backends()[1].health_state(), HealthState::Dead);

        status.store(503, Ordering::SeqCst);
        monitor.check_all().await;
        assert!(!pool.backends()[0].is_alive());
        assert!(pool.select().is_none());

        status.store(200, Ordering::SeqCst);
        monitor.check_all().await;
        assert!(pool.backends()[0].is_alive());
        assert_eq!(pool.select().unwrap().id(), healthy);
    }

    #[tokio::test]
    async fn test_non_200_success_is_dead() {
        let status = Arc::new(AtomicU16::new(204));
        let addr = spawn_health_server(status).await;
        let backend = Backend::new(&format!("http://{}", addr)).unwrap();
        let monitor = monitor(Arc::new(RouteTable::new()));

        let result = monitor.probe(&backend, Deadline::after(Duration::from_secs(1))).await;
        assert_eq!(result, Err(ProbeFailure::Status(StatusCode::NO_CONTENT)));
    }

    /// Accepts connections but never answers.
    async fn spawn_silent_server() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let addr = spawn_silent_server().await;
        let backend = Backend::new(&format!("http://{}", addr)).unwrap();
        let monitor = monitor(Arc::new(RouteTable::new()));
        let result = monitor.probe(&backend, Deadline::after(Duration::from_millis(100))).await;
        assert_eq!(result, Err(ProbeFailure::Timeout));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor(Arc::new(RouteTable::new())).run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_probes() {
        let addr = spawn_silent_server().await;
        let routes = Arc::new(RouteTable::new());
        routes.insert(
            "/slow",
            BackendPool::from_urls(&[format!("http://{}", addr)], Strategy::RoundRobin).unwrap(),
        );
        let config = HealthCheckConfig {
            interval_secs: 30,
            timeout_secs: 10,
            ..Default::default()
        };
        let monitor = HealthMonitor::new(routes, config, Arc::new(Telemetry::disabled()));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
