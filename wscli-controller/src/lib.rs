#![deny(missing_docs)]
//! Session controller for the WS-CLI sandbox platform.
//!
//! The controller admits workload requests, submits one orchestrator job
//! per session, waits until the sandbox pod exposes an IP, records the
//! routing in the shared store, and mints the single-use capability token
//! the caller presents to the WebSocket gateway. It also publishes the
//! token verification keys under `/.well-known/jwks.json`; the gateway
//! bootstraps its verifier from there and never shares secrets with the
//! controller.
//!
//! [`init`] wires the services together and returns the `axum::Router`;
//! the binary in `src/bin` owns the listener, the shutdown signal, and the
//! store/orchestrator construction so tests can inject their own. If the
//! provided `CancellationToken` is cancelled, background tasks stop and
//! `axum::serve`'s graceful shutdown takes over.

use std::sync::Arc;

use axum::Router;
use eyre::Context as _;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument as _;
use uuid::Uuid;
use wscli_capability::key_material::SigningKeyMaterial;
use wscli_capability::key_set::PublicKeySet;
use wscli_capability::mint::TokenMinter;
use wscli_common::StartedServices;
use wscli_store::SessionStoreService;

use crate::config::{CallerAuthMode, ControllerConfig};
use crate::metrics::METRICS_ID_CONTROLLER_ROWS_PURGED;
use crate::services::caller_auth::{
    ApiKeyAuthenticator, CallerAuthService, IdentityTokenAuthenticator,
};
use crate::services::orchestrator::OrchestratorService;
use crate::services::rate_limit::RateLimiter;

pub(crate) mod api;
pub mod config;
pub mod metrics;
pub mod services;

/// Initializes the controller and returns its router.
///
/// This function sets up the components required to serve sessions:
///
/// 1. Loads the signing key material (or generates an ephemeral dev key).
/// 2. Builds the caller authentication service for the configured mode.
/// 3. Spawns the expired-row sweep task.
/// 4. Sets up the axum-based REST API routes.
pub async fn init(
    config: &ControllerConfig,
    store: SessionStoreService,
    orchestrator: OrchestratorService,
    started_services: StartedServices,
    cancellation_token: CancellationToken,
) -> eyre::Result<Router> {
    tracing::info!("loading signing key material..");
    let key_material = match &config.key_material {
        Some(path) => SigningKeyMaterial::from_pem_file(path)
            .context("while loading signing key material")?,
        None => {
            config.environment.assert_is_dev();
            tracing::warn!("no key material configured, generating an ephemeral dev key");
            SigningKeyMaterial::generate().context("while generating dev key material")?
        }
    };
    let key_set = PublicKeySet::new(vec![key_material.public_jwk()]);
    let minter = TokenMinter::new(Arc::new(key_material));

    tracing::info!("init caller auth ({:?})..", config.caller_auth_mode);
    let auth: CallerAuthService = match config.caller_auth_mode {
        CallerAuthMode::ApiKey => Arc::new(
            ApiKeyAuthenticator::from_config(&config.api_keys)
                .context("while parsing API keys")?,
        ),
        CallerAuthMode::IdentityToken => Arc::new(IdentityTokenAuthenticator::new(
            config
                .identity_jwks_url
                .clone()
                .ok_or_else(|| eyre::eyre!("identity-token auth mode requires an identity JWKS url"))?,
            config.identity_issuer.clone(),
            config
                .identity_audience
                .clone()
                .unwrap_or_else(|| "wscli".to_owned()),
        )),
    };

    spawn_sweep_task(
        store.clone(),
        config.sweep_interval,
        started_services.clone(),
        cancellation_token,
    );

    tracing::info!("init controller routes..");
    let rate_limiter = RateLimiter::new(
        config.rate_limit_window,
        config.rate_limit_max,
        config.rate_limit_skip_paths(),
    );
    let router = Router::new()
        .merge(api::health::routes(store.clone(), started_services))
        .merge(api::jwks::routes(key_set))
        .nest(
            "/api",
            api::sessions::routes(api::sessions::SessionArgs {
                store,
                orchestrator,
                auth,
                rate_limiter,
                minter,
                allowed_code_domains: config.allowed_code_domains(),
                session_expiry: config.session_expiry,
                pod_discovery_timeout: config.pod_discovery_timeout,
            }),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        );

    Ok(apply_cors(router, config))
}

fn apply_cors(router: Router, config: &ControllerConfig) -> Router {
    use axum::http::{HeaderValue, Method, header};
    use tower_http::cors::CorsLayer;

    let origins: Vec<HeaderValue> = config
        .allowed_origins()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring unparsable allowed origin {origin:?}");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return router;
    }
    router.layer(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

/// Opportunistic cleanup of expired rows.
///
/// The SQL triggers already purge on write; this task keeps idle periods
/// from accumulating dead rows. Correctness never depends on it.
fn spawn_sweep_task(
    store: SessionStoreService,
    interval: std::time::Duration,
    started_services: StartedServices,
    cancellation_token: CancellationToken,
) {
    tokio::spawn(
        {
            let mut interval = tokio::time::interval(interval);
            let mut started = started_services.new_service();
            async move {
                // first tick triggers instantly
                interval.tick().await;
                started.set_started();
                loop {
                    tokio::select! {
                        _ = cancellation_token.cancelled() => {
                            tracing::debug!("sweep task stopping");
                            break;
                        }
                        _ = interval.tick() => {
                            match store.purge_expired().await {
                                Ok(0) => {}
                                Ok(purged) => {
                                    ::metrics::counter!(METRICS_ID_CONTROLLER_ROWS_PURGED)
                                        .increment(purged);
                                    tracing::debug!("sweep purged {purged} expired row(s)");
                                }
                                Err(err) => {
                                    tracing::warn!("sweep failed, will retry: {err:?}");
                                }
                            }
                        }
                    }
                }
            }
        }
        .instrument(tracing::info_span!("expiry_sweep")),
    );
}
