//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy and admin handlers
//! - Wire up middleware (rate limit, panic boundary, tracing, request ID)
//! - Bind server to listener
//! - Start and stop the background tasks (health monitor, limiter sweep)

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::proxy::{Dispatcher, ProxyError};
use crate::observability::Telemetry;
use crate::routing::{RouteError, RouteTable};
use crate::security::{rate_limit_middleware, RateLimitState, RateLimiter};

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    routes: Arc<RouteTable>,
    telemetry: Arc<Telemetry>,
    limiter: Option<Arc<RateLimiter>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig, telemetry: Arc<Telemetry>) -> Result<Self, RouteError> {
        let routes = Arc::new(RouteTable::from_config(&config.routes)?);
        let dispatcher = Arc::new(Dispatcher::new(routes.clone(), telemetry.clone(), &config.timeouts));
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));

        let router = Self::build_router(&config, dispatcher, limiter.clone(), telemetry.clone());
        Ok(Self {
            router,
            config,
            routes,
            telemetry,
            limiter,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        config: &ProxyConfig,
        dispatcher: Arc<Dispatcher>,
        limiter: Option<Arc<RateLimiter>>,
        telemetry: Arc<Telemetry>,
    ) -> Router {
        let mut app = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(dispatcher.clone());

        if let Some(limiter) = limiter {
            let state = RateLimitState {
                limiter,
                telemetry: telemetry.clone(),
            };
            app = app.layer(middleware::from_fn_with_state(state, rate_limit_middleware));
        }
        app = with_panic_boundary(app);

        if config.admin.enabled {
            app = app.merge(setup_admin_router(AdminState {
                routes: dispatcher.routes().clone(),
                telemetry,
                api_key: config.admin.api_key.as_deref().filter(|k| !k.is_empty()).map(Arc::from),
            }));
        }

        app.layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The live route table, shared with the admin API.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires, accepting connections on the
    /// given listener.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.routes.len(),
            admin = self.config.admin.enabled,
            rate_limit = self.limiter.is_some(),
            "HTTP server starting"
        );

        let monitor = HealthMonitor::new(
            self.routes.clone(),
            self.config.health_check.clone(),
            self.telemetry.clone(),
        );
        let monitor_task = tokio::spawn(monitor.run(shutdown.resubscribe()));

        let sweeper_task = self.limiter.clone().map(|limiter| {
            let max_idle = Duration::from_secs(self.config.rate_limit.idle_eviction_secs);
            tokio::spawn(limiter.run_sweeper(max_idle, shutdown.resubscribe()))
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        let _ = monitor_task.await;
        if let Some(task) = sweeper_task {
            let _ = task.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
async fn proxy_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    dispatcher.dispatch(request, addr).await
}

/// Turn a panicking handler into a 500 for that request only.
fn with_panic_boundary(app: Router) -> Router {
    app.layer(CatchPanicLayer::custom(handle_panic))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
