#![deny(missing_docs)]
//! WebSocket gateway for the WS-CLI sandbox platform.
//!
//! The gateway is the stateless edge between browsers and sandbox pods. A
//! client presenting a capability token on `/ws/{sessionId}` is verified
//! against the controller's published key set, its one-time token id is
//! atomically consumed in the shared store, the pod route is resolved, and
//! the upgraded stream is spliced byte-for-byte with the pod's terminal
//! server. Every check happens before the upgrade completes, and any
//! failure tears the connection down without explanation.
//!
//! The gateway holds no secrets: verification keys are fetched from the
//! controller at first use and cached by key identifier, so key rotation
//! is a controller-side publication. It performs no retries; a failed
//! attach is the caller's problem, and a consumed token stays consumed.
//!
//! [`init`] wires the services together and returns the `axum::Router`;
//! the binary in `src/bin` owns the listener, the shutdown signal, and the
//! store construction so tests can inject their own.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use wscli_capability::verify::RemoteKeySet;
use wscli_store::SessionStoreService;

use crate::config::GatewayConfig;

pub(crate) mod api;
pub mod config;
pub mod metrics;
pub(crate) mod proxy;

/// Initializes the gateway and returns its router.
pub fn init(config: &GatewayConfig, store: SessionStoreService) -> Router {
    tracing::info!("init gateway routes..");
    let key_set = Arc::new(RemoteKeySet::new(config.key_set_url.clone()));
    init_with_key_set(config, store, key_set)
}

/// [`init`] with an externally constructed verifier (used by tests).
pub fn init_with_key_set(
    config: &GatewayConfig,
    store: SessionStoreService,
    key_set: Arc<RemoteKeySet>,
) -> Router {
    Router::new()
        .merge(api::health::routes())
        .merge(api::attach::routes(api::attach::AttachArgs {
            store,
            key_set,
            terminal_port: config.terminal_port,
            upstream_connect_timeout: clamp_connect_timeout(config.upstream_connect_timeout),
        }))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        )
}

/// Tests construct configs directly, so the bounds are enforced here as
/// well as in [`GatewayConfig::validate`].
fn clamp_connect_timeout(timeout: Duration) -> Duration {
    timeout.clamp(
        config::MIN_UPSTREAM_CONNECT_TIMEOUT,
        config::MAX_UPSTREAM_CONNECT_TIMEOUT,
    )
}
