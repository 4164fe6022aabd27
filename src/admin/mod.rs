//! Admin API.
//!
//! # Endpoints
//! - `POST /admin/add-backend`: append a backend, creating the route if needed
//! - `POST /admin/remove-backend`: remove a backend from a route
//! - `POST /admin/update-route`: replace backends and/or strategy
//! - `GET /admin/routes`: route summary
//! - `GET /admin/backends`: per-backend runtime state
//!
//! Mounted on the main listener. When `admin.api_key` is set every call
//! needs `Authorization: Bearer <key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::observability::Telemetry;
use crate::routing::RouteTable;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state of the admin handlers.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub routes: Arc<RouteTable>,
    pub telemetry: Arc<Telemetry>,
    pub api_key: Option<Arc<str>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/add-backend", post(add_backend))
        .route("/admin/remove-backend", post(remove_backend))
        .route("/admin/update-route", post(update_route))
        .route("/admin/routes", get(list_routes))
        .route("/admin/backends", get(list_backends))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
