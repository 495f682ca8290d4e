//! Health Check Endpoints
//!
//! - `/healthz` – general health including store connectivity.
//! - `/readyz` – readiness of the background services.
//!
//! The endpoints include a `Cache-Control: no-cache` header to prevent
//! caching of responses.

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;
use wscli_common::StartedServices;
use wscli_store::SessionStoreService;

/// Create a router containing the health endpoints.
///
/// All endpoints have `Cache-Control: no-cache` set.
pub(crate) fn routes(store: SessionStoreService, started_services: StartedServices) -> Router {
    Router::new()
        .route("/healthz", get(move || healthz(store)))
        .route("/readyz", get(move || readyz(started_services)))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

/// General health check endpoint.
///
/// Returns `200 OK` with `{"status":"ok","database":"connected"}` when the
/// store answers, `503 Service Unavailable` with `{"status":"degraded"}`
/// otherwise.
async fn healthz(store: SessionStoreService) -> impl IntoResponse {
    match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "database": "connected"})),
        ),
        Err(err) => {
            tracing::warn!("store ping failed: {err:?}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "degraded"})),
            )
        }
    }
}

/// Readiness endpoint.
///
/// Returns `200 OK` with a plain `"ready"` response if all services
/// already started, `503 Service Unavailable` with `"not ready"` otherwise.
async fn readyz(started_services: StartedServices) -> impl IntoResponse {
    if started_services.all_started() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
