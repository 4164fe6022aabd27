use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::load_balancer::{HealthState, Strategy};
use crate::routing::matcher::normalize_prefix;
use crate::routing::{AddBackendOutcome, RouteError, RouteInfo};

/// Admin call failures.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RouteError> for AdminError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::RouteNotFound(prefix) => AdminError::RouteNotFound(prefix),
            RouteError::InvalidBackend(e) => AdminError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdminError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// Bodies are decoded by hand so a missing content type is not an error.
fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, AdminError> {
    serde_json::from_slice(body).map_err(|e| AdminError::BadRequest(format!("invalid request: {}", e)))
}

fn require_prefix(prefix: &str) -> Result<(), AdminError> {
    if prefix.starts_with('/') {
        Ok(())
    } else {
        Err(AdminError::BadRequest(format!("prefix '{}' must start with '/'", prefix)))
    }
}

#[derive(Debug, Deserialize)]
pub struct AddBackendRequest {
    pub prefix: String,
    pub url: String,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveBackendRequest {
    pub prefix: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRouteRequest {
    pub prefix: String,
    #[serde(default)]
    pub backends: Vec<String>,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MutationResult {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_route: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub route: String,
    pub url: String,
    pub alive: bool,
    pub health: &'static str,
    pub active_requests: i64,
    pub total_requests: u64,
    pub avg_latency_ms: f64,
    pub selections: u64,
}

pub async fn add_backend(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Json<MutationResult>, AdminError> {
    let req: AddBackendRequest = decode(&body)?;
    require_prefix(&req.prefix)?;

    let strategy = Strategy::parse(req.strategy.as_deref().unwrap_or_default());
    let outcome = state.routes.add_backend(&req.prefix, &req.url, strategy)?;

    Ok(Json(MutationResult {
        message: format!("Backend {} added to route {}", req.url, req.prefix),
        created_route: Some(outcome == AddBackendOutcome::CreatedRoute),
        removed: None,
    }))
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Json<MutationResult>, AdminError> {
    let req: RemoveBackendRequest = decode(&body)?;
    require_prefix(&req.prefix)?;
    let removed = state.routes.remove_backend(&req.prefix, &req.url);

    Ok(Json(MutationResult {
        message: format!("Backend {} removed from route {}", req.url, req.prefix),
        created_route: None,
        removed: Some(removed),
    }))
}

pub async fn update_route(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Json<RouteInfo>, AdminError> {
    let req: UpdateRouteRequest = decode(&body)?;
    require_prefix(&req.prefix)?;
    let prefix = normalize_prefix(&req.prefix);

    let update = state
        .routes
        .update_route(&prefix, &req.backends, req.strategy.as_deref())?;

    if let Some((from, to)) = update.strategy_change {
        state.telemetry.record_strategy_change(&prefix, from, to);
        tracing::info!(prefix = %prefix, from = %from, to = %to, "Route strategy changed");
    }

    let pool = state
        .routes
        .get(&prefix)
        .ok_or_else(|| AdminError::Internal(format!("route {} vanished during update", prefix)))?;
    Ok(Json(RouteInfo {
        prefix,
        strategy: pool.strategy(),
        backends: pool.backend_ids(),
    }))
}

pub async fn list_routes(State(state): State<AdminState>) -> Json<Vec<RouteInfo>> {
    Json(state.routes.list())
}

pub async fn list_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let mut statuses = Vec::new();

    for (prefix, pool) in state.routes.snapshot() {
        for b in pool.backends() {
            let health = match b.health_state() {
                HealthState::Unknown => "unknown",
                HealthState::Alive => "alive",
                HealthState::Dead => "dead",
            };
            statuses.push(BackendStatus {
                route: prefix.clone(),
                url: b.id().to_string(),
                alive: b.is_alive(),
                health,
                active_requests: b.active_requests(),
                total_requests: b.total_requests(),
                avg_latency_ms: b.avg_latency_ms(),
                selections: b.selections(),
            });
        }
    }

    Json(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::setup_admin_router;
    use crate::load_balancer::BackendPool;
    use crate::observability::Telemetry;
    use crate::routing::RouteTable;
    use axum::{body::Body, http::Request, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn admin(api_key: Option<&str>) -> (Router, Arc<RouteTable>) {
        let routes = Arc::new(RouteTable::new());
        routes.insert(
            "/api/users",
            BackendPool::from_urls(&["http://127.0.0.1:8081", "http://127.0.0.1:8082"], Strategy::RoundRobin)
                .unwrap(),
        );
        let state = AdminState {
            routes: routes.clone(),
            telemetry: Arc::new(Telemetry::disabled()),
            api_key: api_key.map(Arc::from),
        };
        (setup_admin_router(state), routes)
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_add_backend_appends_and_creates() {
        let (app, routes) = admin(None);

        let res = app
            .clone()
            .oneshot(post(
                "/admin/add-backend",
                r#"{"prefix":"/api/users","url":"http://127.0.0.1:8083","strategy":"least_active"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["created_route"], false);

        let pool = routes.get("/api/users").unwrap();
        assert_eq!(pool.len(), 3);
        // Strategy is ignored when appending.
        assert_eq!(pool.strategy(), Strategy::RoundRobin);

        let res = app
            .oneshot(post(
                "/admin/add-backend",
                r#"{"prefix":"/orders","url":"http://127.0.0.1:9000","strategy":"least_latency"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(json_body(res).await["created_route"], true);
        assert_eq!(routes.get("/orders").unwrap().strategy(), Strategy::LeastLatency);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected_without_change() {
        let (app, routes) = admin(None);

        for body in ["{not json", r#"{"prefix":"/api/users"}"#, r#"{"prefix":"/x","url":"nope"}"#] {
            let res = app.clone().oneshot(post("/admin/add-backend", body)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {}", body);
        }
        assert_eq!(routes.len(), 1);
        assert_eq!(routes.get("/api/users").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_backend() {
        let (app, routes) = admin(None);

        let res = app
            .oneshot(post(
                "/admin/remove-backend",
                r#"{"prefix":"/api/users","url":"http://127.0.0.1:8081/"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["removed"], 1);
        assert_eq!(routes.get("/api/users").unwrap().backend_ids(), vec!["http://127.0.0.1:8082"]);
    }

    #[tokio::test]
    async fn test_update_route() {
        let (app, routes) = admin(None);

        let res = app
            .clone()
            .oneshot(post(
                "/admin/update-route",
                r#"{"prefix":"/api/users","strategy":"least_active"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let info = json_body(res).await;
        assert_eq!(info["strategy"], "least_active");
        assert_eq!(info["backends"].as_array().unwrap().len(), 2);
        assert_eq!(routes.get("/api/users").unwrap().strategy(), Strategy::LeastActive);

        let res = app
            .oneshot(post("/admin/update-route", r#"{"prefix":"/missing","strategy":"least_active"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_route_normalizes_and_checks_prefix() {
        let (app, routes) = admin(None);

        let res = app
            .clone()
            .oneshot(post(
                "/admin/update-route",
                r#"{"prefix":"/api/users/","strategy":"least_latency"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["prefix"], "/api/users");
        assert_eq!(routes.get("/api/users").unwrap().strategy(), Strategy::LeastLatency);

        for uri in ["/admin/update-route", "/admin/remove-backend"] {
            let res = app
                .clone()
                .oneshot(post(uri, r#"{"prefix":"api/users","url":"http://127.0.0.1:8081","strategy":"least_active"}"#))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "uri {}", uri);
        }
        assert_eq!(routes.get("/api/users").unwrap().strategy(), Strategy::LeastLatency);
        assert_eq!(routes.get("/api/users").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_listing() {
        let (app, _routes) = admin(None);

        let res = app
            .clone()
            .oneshot(Request::get("/admin/routes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let routes = json_body(res).await;
        assert_eq!(routes[0]["prefix"], "/api/users");
        assert_eq!(routes[0]["strategy"], "round_robin");

        let res = app
            .oneshot(Request::get("/admin/backends").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let backends = json_body(res).await;
        assert_eq!(backends.as_array().unwrap().len(), 2);
        assert_eq!(backends[0]["health"], "unknown");
        assert_eq!(backends[0]["alive"], true);
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let (app, _routes) = admin(Some("s3cret"));

        let res = app
            .clone()
            .oneshot(Request::get("/admin/routes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .oneshot(
                Request::get("/admin/routes")
                    .header("authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
