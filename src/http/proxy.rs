//! Request dispatch.
//!
//! # Responsibilities
//! - Resolve the request path to a route and select a backend
//! - Forward the request within the inbound request's deadline
//! - Keep backend counters balanced on every exit path
//! - Map failures to gateway status codes
//!
//! # Design Decisions
//! - No automatic retry or failover: a failed upstream call is final
//! - The route table lock is released before any network I/O
//! - The backend stays counted as active until the response body has been
//!   relayed in full (or abandoned), not just until headers arrive

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::TimeoutConfig;
use crate::http::request::{prepare_upstream, request_id, strip_hop_by_hop};
use crate::http::response::{BodyEnd, BodySummary, ObservedBody};
use crate::load_balancer::ActiveRequestGuard;
use crate::observability::{RequestOutcome, Telemetry};
use crate::resilience::{Deadline, DeadlineExceeded};
use crate::routing::RouteTable;

/// Request-level failures, each mapped to one response status.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no route matches path {0}")]
    RouteNotFound(String),

    #[error("no backend available for route {0}")]
    NoBackendAvailable(String),

    #[error("cannot build upstream request: {0}")]
    InvalidRequest(#[source] axum::http::Error),

    #[error("upstream {backend} failed: {source}")]
    Upstream {
        backend: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream {backend} timed out: {source}")]
    Timeout {
        backend: String,
        #[source]
        source: DeadlineExceeded,
    },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::NoBackendAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::RouteNotFound(_) => "No backend found for route",
            ProxyError::NoBackendAvailable(_) => "No backend available",
            ProxyError::InvalidRequest(_) => "Invalid request",
            ProxyError::Upstream { .. } => "Bad Gateway",
            ProxyError::Timeout { .. } => "Gateway Timeout",
        };
        (self.status(), message).into_response()
    }
}

/// A request that holds a backend slot until it is finished.
struct InFlight {
    telemetry: Arc<Telemetry>,
    prefix: String,
    method: Method,
    request_id: String,
    guard: ActiveRequestGuard,
    started: Instant,
}

impl InFlight {
    /// Release the slot and record the outcome. Consumes `self`, so it
    /// runs at most once per request.
    fn finish(self, status: StatusCode, summary: BodySummary) {
        let duration = self.started.elapsed();
        let backend = self.guard.backend().clone();
        drop(self.guard);

        backend.record_request(duration);
        self.telemetry
            .record_backend_request(&self.prefix, &backend, status.as_u16());
        self.telemetry.record_request(&RequestOutcome {
            route: &self.prefix,
            method: self.method.as_str(),
            status: status.as_u16(),
            duration,
            bytes: summary.bytes,
        });

        if summary.end != BodyEnd::Complete {
            tracing::warn!(
                request_id = %self.request_id,
                backend = %backend.id(),
                end = ?summary.end,
                bytes = summary.bytes,
                "Response body not fully relayed"
            );
        }
        tracing::info!(
            request_id = %self.request_id,
            method = %self.method,
            route = %self.prefix,
            backend = %backend.id(),
            status = status.as_u16(),
            duration_ms = duration.as_secs_f64() * 1000.0,
            avg_latency_ms = backend.avg_latency_ms(),
            active = backend.active_requests(),
            "Request proxied"
        );
    }
}

/// Ties route resolution, backend selection and forwarding together.
#[derive(Debug)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    client: Client<HttpConnector, Body>,
    telemetry: Arc<Telemetry>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>, telemetry: Arc<Telemetry>, timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            routes,
            client,
            telemetry,
            request_timeout: Duration::from_secs(timeouts.request_secs),
        }
    }

    /// Override the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Proxy one inbound request.
    pub async fn dispatch(&self, request: Request<Body>, client_addr: SocketAddr) -> Result<Response, ProxyError> {
        let started = Instant::now();
        let deadline = Deadline::after(self.request_timeout);
        let path = request.uri().path().to_string();
        let request_id = request_id(request.headers()).to_string();

        let Some(route) = self.routes.resolve(&path) else {
            tracing::warn!(request_id = %request_id, path = %path, "No route matched");
            self.telemetry.record_route_error("unknown", "route_not_found");
            return Err(ProxyError::RouteNotFound(path));
        };

        let Some(backend) = route.pool.select() else {
            tracing::error!(
                request_id = %request_id,
                method = %request.method(),
                path = %path,
                route = %route.prefix,
                "No backend available"
            );
            self.telemetry
                .record_route_error(&route.prefix, "no_backend_available");
            return Err(ProxyError::NoBackendAvailable(route.prefix));
        };
        self.telemetry
            .record_selection(&route.prefix, &backend, route.pool.strategy());

        tracing::debug!(
            request_id = %request_id,
            path = %path,
            route = %route.prefix,
            backend = %backend.id(),
            strategy = %route.pool.strategy(),
            "Backend selected"
        );

        let in_flight = InFlight {
            telemetry: self.telemetry.clone(),
            prefix: route.prefix,
            method: request.method().clone(),
            request_id,
            guard: backend.track_active(),
            started,
        };
        let failed = BodySummary {
            bytes: 0,
            end: BodyEnd::Complete,
        };

        let upstream = match prepare_upstream(request, &backend, client_addr.ip()) {
            Ok(upstream) => upstream,
            Err(e) => {
                let error = ProxyError::InvalidRequest(e);
                in_flight.finish(error.status(), failed);
                return Err(error);
            }
        };

        match deadline.run(self.client.request(upstream)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);

                let body = ObservedBody::new(Body::new(body), move |summary| in_flight.finish(status, summary));
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Ok(Err(source)) => {
                tracing::error!(
                    request_id = %in_flight.request_id,
                    backend = %backend.id(),
                    error = %source,
                    "Upstream request failed"
                );
                self.telemetry
                    .record_backend_failure(&in_flight.prefix, &backend, "connection_error");
                let error = ProxyError::Upstream {
                    backend: backend.id().to_string(),
                    source,
                };
                in_flight.finish(error.status(), failed);
                Err(error)
            }
            Err(source) => {
                tracing::error!(
                    request_id = %in_flight.request_id,
                    backend = %backend.id(),
                    timeout = ?source.0,
                    "Upstream request timed out"
                );
                self.telemetry
                    .record_backend_failure(&in_flight.prefix, &backend, "timeout");
                let error = ProxyError::Timeout {
                    backend: backend.id().to_string(),
                    source,
                };
                in_flight.finish(error.status(), failed);
                Err(error)
            }
        }
    }
}
