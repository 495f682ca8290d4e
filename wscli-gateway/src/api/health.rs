//! Health Check Endpoint
//!
//! The gateway is stateless; `/healthz` only reports that the process
//! serves requests. Store and key-set reachability surface on the attach
//! path itself.

use axum::{Router, routing::get};

/// Create a router containing the health endpoint.
pub(crate) fn routes() -> Router {
    Router::new().route("/healthz", get(|| async { "ok" }))
}
