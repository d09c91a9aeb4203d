//! Admin HTTP surface of the data plane.
//!
//! `GET /healthz`, `GET /jobs`, `POST /jobs/reload`, plus the wizard's
//! `POST /api/rules/baseline/check` and `POST /api/rules/preview`.
//! Failures respond `{"ok": false, "error": "..."}`.

use crate::reconcile::reconcile;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use dbmon_adapter::DataSourceAdapter;
use dbmon_scheduler::preview::{
    baseline_check, preview, BaselineCheckRequest, PreviewRequest,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use uuid::Uuid;

const RELOAD_DEADLINE: Duration = Duration::from_secs(15);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "dbmon scheduler API",
        description = "Admin surface of the dbmon data plane",
    ),
    tags(
        (name = "System", description = "Health and job inspection"),
        (name = "Wizard", description = "One-shot baseline and preview evaluation")
    )
)]
struct ApiDoc;

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: &'static str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"ok": false, "error": message}))).into_response()
}

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "System",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[utoipa::path(
    get,
    path = "/jobs",
    tag = "System",
    responses((status = 200, description = "Scheduled jobs with their poll intervals"))
)]
async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list_jobs())
}

#[utoipa::path(
    post,
    path = "/jobs/reload",
    tag = "System",
    responses(
        (status = 200, description = "Reconciliation triggered"),
        (status = 500, description = "Reconciliation failed")
    )
)]
async fn reload_jobs(State(state): State<AppState>) -> Response {
    match tokio::time::timeout(RELOAD_DEADLINE, reconcile(&state)).await {
        Ok(Ok(())) => Json(json!({"ok": true})).into_response(),
        Ok(Err(err)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "reconciliation timed out"),
    }
}

/// Resolve a connection reference to its registered adapter.
async fn resolve_adapter(
    state: &AppState,
    connection_ref: &str,
) -> Result<Arc<dyn DataSourceAdapter>, Response> {
    let id = Uuid::parse_str(connection_ref)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid connectionRef"))?;
    let connection_type = state
        .store
        .get_connection_type(id)
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "connection not found"))?;
    state
        .adapters
        .adapter_for(&connection_type)
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, &err.to_string()))
}

#[utoipa::path(
    post,
    path = "/api/rules/baseline/check",
    tag = "Wizard",
    responses(
        (status = 200, description = "Baseline availability counts and continuity summary"),
        (status = 400, description = "Unknown connection or adapter"),
        (status = 500, description = "Adapter query failed")
    )
)]
async fn baseline_check_handler(
    State(state): State<AppState>,
    Json(request): Json<BaselineCheckRequest>,
) -> Response {
    let adapter = match resolve_adapter(&state, &request.connection_ref).await {
        Ok(adapter) => adapter,
        Err(response) => return response,
    };
    match baseline_check(adapter.as_ref(), &state.allowlist, &state.limits, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[utoipa::path(
    post,
    path = "/api/rules/preview",
    tag = "Wizard",
    responses(
        (status = 200, description = "One-shot detector evaluation over a fresh window"),
        (status = 400, description = "Unknown connection or adapter"),
        (status = 500, description = "Adapter query failed")
    )
)]
async fn preview_handler(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Response {
    let adapter = match resolve_adapter(&state, &request.connection_ref).await {
        Ok(adapter) => adapter,
        Err(response) => return response,
    };
    match preview(adapter.as_ref(), &state.allowlist, &state.limits, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

pub fn build_admin_app(state: AppState) -> Router {
    let (router, spec) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(healthz))
        .routes(routes!(list_jobs))
        .routes(routes!(reload_jobs))
        .routes(routes!(baseline_check_handler))
        .routes(routes!(preview_handler))
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let spec_json = serde_json::to_value(&spec).unwrap_or_default();
    router
        .with_state(state)
        .route(
            "/openapi.json",
            axum::routing::get(move || {
                let spec = spec_json.clone();
                async move { Json(spec) }
            }),
        )
        .layer(cors)
}
