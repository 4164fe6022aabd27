//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define load balancer metrics (requests, latency, errors, backend state)
//! - Expose a Prometheus-compatible metrics endpoint
//! - Track per-route and per-backend series
//!
//! # Metrics
//! - `lb_route_requests_total` (counter): requests by route, method, status
//! - `lb_route_request_duration_seconds` (histogram): latency per route
//! - `lb_route_response_size_bytes` (histogram): bytes relayed per route
//! - `lb_route_errors_total` (counter): errors by route and class
//! - `lb_route_strategy_changes_total` (counter): admin strategy switches
//! - `lb_backend_selection_total` (counter): picks per backend and strategy
//! - `lb_backend_requests_total` (counter): completed requests per backend
//! - `lb_backend_active_requests` (gauge): in-flight requests per backend
//! - `lb_backend_avg_latency_ms` (gauge): running average per backend
//! - `lb_backend_failures_total` (counter): failures by type
//! - `lb_backend_health_status` (gauge): 1=alive, 0=dead
//! - `lb_backend_health_check_duration_seconds` (histogram)
//! - `lb_rate_limited_total` (counter)
//!
//! # Design Decisions
//! - `Telemetry` is an explicit context built once in `main` and handed to
//!   the components that report; nothing records through hidden globals of
//!   our own
//! - Metric updates are cheap (atomic operations in the recorder)
//! - A disabled context skips label allocation entirely

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ObservabilityConfig;
use crate::load_balancer::{Backend, Strategy};

/// Errors raised while installing the metrics exporter.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid metrics address '{0}'")]
    Address(String),

    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to install metrics recorder: {0}")]
    Recorder(String),
}

/// Everything reported about one finished request.
#[derive(Debug, Clone)]
pub struct RequestOutcome<'a> {
    /// Matched prefix, or "unknown" when no route matched.
    pub route: &'a str,
    pub method: &'a str,
    pub status: u16,
    pub duration: Duration,
    pub bytes: u64,
}

/// Observability context shared by the dispatcher, health monitor,
/// rate limiter and admin API.
#[derive(Debug)]
pub struct Telemetry {
    enabled: bool,
    exporter: Mutex<Option<JoinHandle<()>>>,
}

impl Telemetry {
    /// A context that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            exporter: Mutex::new(None),
        }
    }

    /// Install the Prometheus recorder and start its HTTP listener.
    ///
    /// Must be called from within a Tokio runtime. Returns a disabled
    /// context when metrics are turned off in config.
    pub fn install(config: &ObservabilityConfig) -> Result<Self, TelemetryError> {
        if !config.metrics_enabled {
            tracing::info!("Metrics disabled");
            return Ok(Self::disabled());
        }

        let addr: SocketAddr = config
            .metrics_address
            .parse()
            .map_err(|_| TelemetryError::Address(config.metrics_address.clone()))?;

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()?;
        metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Recorder(e.to_string()))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });

        tracing::info!(address = %addr, "Metrics endpoint listening");
        Ok(Self {
            enabled: true,
            exporter: Mutex::new(Some(handle)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stop the exporter. Recording afterwards is harmless.
    pub fn shutdown(&self) {
        let handle = self.exporter.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Metrics exporter stopped");
        }
    }

    pub fn record_request(&self, outcome: &RequestOutcome<'_>) {
        if !self.enabled {
            return;
        }
        let route = outcome.route.to_string();
        counter!(
            "lb_route_requests_total",
            "route" => route.clone(),
            "method" => outcome.method.to_string(),
            "status_code" => outcome.status.to_string()
        )
        .increment(1);
        histogram!(
            "lb_route_request_duration_seconds",
            "route" => route.clone(),
            "method" => outcome.method.to_string()
        )
        .record(outcome.duration.as_secs_f64());
        if outcome.bytes > 0 {
            histogram!("lb_route_response_size_bytes", "route" => route.clone()).record(outcome.bytes as f64);
        }
        if outcome.status >= 400 {
            let class = if outcome.status >= 500 { "server_error" } else { "client_error" };
            counter!("lb_route_errors_total", "route" => route, "error_type" => class).increment(1);
        }
    }

    pub fn record_route_error(&self, route: &str, error_type: &'static str) {
        if !self.enabled {
            return;
        }
        counter!("lb_route_errors_total", "route" => route.to_string(), "error_type" => error_type).increment(1);
    }

    pub fn record_strategy_change(&self, route: &str, from: Strategy, to: Strategy) {
        if !self.enabled {
            return;
        }
        counter!(
            "lb_route_strategy_changes_total",
            "route" => route.to_string(),
            "from_strategy" => from.as_str(),
            "to_strategy" => to.as_str()
        )
        .increment(1);
    }

    pub fn record_selection(&self, route: &str, backend: &Backend, strategy: Strategy) {
        if !self.enabled {
            return;
        }
        counter!(
            "lb_backend_selection_total",
            "route" => route.to_string(),
            "backend" => backend.id().to_string(),
            "strategy" => strategy.as_str()
        )
        .increment(1);
        self.record_backend_load(route, backend);
    }

    /// Completed request against a backend, plus its refreshed load gauges.
    pub fn record_backend_request(&self, route: &str, backend: &Backend, status: u16) {
        if !self.enabled {
            return;
        }
        counter!(
            "lb_backend_requests_total",
            "route" => route.to_string(),
            "backend" => backend.id().to_string(),
            "status_code" => status.to_string()
        )
        .increment(1);
        if status >= 500 {
            self.record_backend_failure(route, backend, "server_error");
        }
        self.record_backend_load(route, backend);
    }

    fn record_backend_load(&self, route: &str, backend: &Backend) {
        gauge!(
            "lb_backend_active_requests",
            "route" => route.to_string(),
            "backend" => backend.id().to_string()
        )
        .set(backend.active_requests() as f64);
        gauge!(
            "lb_backend_avg_latency_ms",
            "route" => route.to_string(),
            "backend" => backend.id().to_string()
        )
        .set(backend.avg_latency_ms());
    }

    pub fn record_backend_failure(&self, route: &str, backend: &Backend, failure_type: &'static str) {
        if !self.enabled {
            return;
        }
        counter!(
            "lb_backend_failures_total",
            "route" => route.to_string(),
            "backend" => backend.id().to_string(),
            "failure_type" => failure_type
        )
        .increment(1);
    }

    pub fn record_backend_health(&self, route: &str, backend: &Backend, alive: bool, duration: Duration) {
        if !self.enabled {
            return;
        }
        gauge!(
            "lb_backend_health_status",
            "route" => route.to_string(),
            "backend" => backend.id().to_string()
        )
        .set(if alive { 1.0 } else { 0.0 });
        histogram!(
            "lb_backend_health_check_duration_seconds",
            "route" => route.to_string(),
            "backend" => backend.id().to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_rate_limited(&self) {
        if !self.enabled {
            return;
        }
        counter!("lb_rate_limited_total").increment(1);
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_context_is_inert() {
        let telemetry = Telemetry::disabled();
        let backend = Backend::new("http://127.0.0.1:1").unwrap();
        assert!(!telemetry.is_enabled());

        telemetry.record_request(&RequestOutcome {
            route: "/api",
            method: "GET",
            status: 502,
            duration: Duration::from_millis(3),
            bytes: 10,
        });
        telemetry.record_selection("/api", &backend, Strategy::RoundRobin);
        telemetry.record_backend_health("/api", &backend, false, Duration::from_millis(1));
        telemetry.shutdown();
    }

    #[tokio::test]
    async fn test_metrics_off_in_config() {
        let config = ObservabilityConfig {
            metrics_enabled: false,
            ..Default::default()
        };
        let telemetry = Telemetry::install(&config).unwrap();
        assert!(!telemetry.is_enabled());
    }

    #[tokio::test]
    async fn test_bad_metrics_address() {
        let config = ObservabilityConfig {
            metrics_address: "nowhere".into(),
            ..Default::default()
        };
        assert!(matches!(Telemetry::install(&config), Err(TelemetryError::Address(_))));
    }
}
