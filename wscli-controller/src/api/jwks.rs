//! Public key set endpoint.
//!
//! Serves the verification keys for attach tokens under the well-known
//! path. The gateway (and any other verifier) consumes this document and
//! caches entries by key identifier, so rotation is done by publishing an
//! additional entry here.

use axum::{
    Json, Router,
    http::{HeaderValue, header},
    routing::get,
};
use tower_http::set_header::SetResponseHeaderLayer;
use wscli_capability::key_set::PublicKeySet;

/// Create a router serving `/.well-known/jwks.json`.
pub(crate) fn routes(key_set: PublicKeySet) -> Router {
    Router::new()
        .route(
            "/.well-known/jwks.json",
            get(move || async move { Json(key_set) }),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}
