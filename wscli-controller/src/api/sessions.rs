//! Session creation and lookup.
//!
//! `POST /api/sessions` runs the full provisioning pipeline in order:
//! authenticate → rate-limit → validate → session row → job submit →
//! pod-IP discovery → placement update → token mint → token-id row →
//! respond. A crash between any two steps leaves only rows the expiry
//! sweep reclaims; nothing later in the pipeline is observable before the
//! response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router, extract::Path};
use time::OffsetDateTime;
use tracing::{Instrument as _, instrument};
use wscli_capability::mint::TokenMinter;
use wscli_store::SessionStoreService;
use wscli_types::api::v1::{CreateSessionRequest, CreateSessionResponse, SessionView};
use wscli_types::session::SessionRecord;
use wscli_types::SessionId;

use crate::api::errors::ApiError;
use crate::metrics::{
    METRICS_ID_CONTROLLER_ADMISSION_REJECTED, METRICS_ID_CONTROLLER_DISCOVERY_DURATION,
    METRICS_ID_CONTROLLER_DISCOVERY_TIMEOUT, METRICS_ID_CONTROLLER_RATE_LIMITED,
    METRICS_ID_CONTROLLER_SESSIONS_CREATED,
};
use crate::services::admission;
use crate::services::caller_auth::CallerAuthService;
use crate::services::orchestrator::{JobRequest, OrchestratorError, OrchestratorService};
use crate::services::rate_limit::RateLimiter;

/// The path the rate limiter accounts session creations under.
const SESSIONS_PATH: &str = "/api/sessions";

/// Everything the session handlers need.
pub(crate) struct SessionArgs {
    pub(crate) store: SessionStoreService,
    pub(crate) orchestrator: OrchestratorService,
    pub(crate) auth: CallerAuthService,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) minter: TokenMinter,
    pub(crate) allowed_code_domains: Vec<String>,
    pub(crate) session_expiry: Duration,
    pub(crate) pod_discovery_timeout: Duration,
}

/// Creates the `/sessions` router (nested under `/api` by the service
/// builder).
pub(crate) fn routes(args: SessionArgs) -> Router {
    let args = Arc::new(args);
    let create_args = Arc::clone(&args);
    Router::new()
        .route(
            "/sessions",
            post(move |headers: HeaderMap, Json(request): Json<CreateSessionRequest>| {
                create_session(Arc::clone(&create_args), headers, request)
            }),
        )
        .route(
            "/sessions/{id}",
            get(move |headers: HeaderMap, Path(raw_id): Path<String>| {
                get_session(Arc::clone(&args), headers, raw_id)
            }),
        )
}

/// The full provisioning pipeline for one session.
///
/// On success the session row has a non-null pod IP, a token-id row
/// exists, and the returned token verifies against the published key set.
#[instrument(
    level = "debug",
    skip_all,
    fields(session_id = tracing::field::Empty, owner = tracing::field::Empty)
)]
async fn create_session(
    args: Arc<SessionArgs>,
    headers: HeaderMap,
    request: CreateSessionRequest,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let identity = args.auth.authenticate(&headers).await?;
    let span = tracing::Span::current();
    span.record("owner", identity.owner_id.to_string());

    args.rate_limiter
        .check(&identity.owner_id, SESSIONS_PATH)
        .map_err(|err| {
            ::metrics::counter!(METRICS_ID_CONTROLLER_RATE_LIMITED).increment(1);
            err
        })?;

    admission::validate_request(&request, &args.allowed_code_domains).map_err(|reject| {
        ::metrics::counter!(METRICS_ID_CONTROLLER_ADMISSION_REJECTED).increment(1);
        ApiError::Validation(reject.0)
    })?;

    let session_id = SessionId::generate();
    span.record("session_id", session_id.to_string());
    tracing::debug!("admitted session request");

    let now = OffsetDateTime::now_utc();
    let record = SessionRecord::new(
        session_id,
        identity.owner_id.clone(),
        now,
        now + args.session_expiry,
    );
    // the id generator makes collisions impossible in practice, so a
    // duplicate here is an internal error like any other store failure
    args.store.insert_session(&record).await?;

    let job_request = JobRequest {
        session_id,
        job_name: record.job_name.clone(),
        code_url: request.code_url,
        code_checksum: request.code_checksum,
        command: request.command,
        prompt: request.prompt,
    };
    args.orchestrator
        .create_job(&job_request)
        .await
        .map_err(ApiError::Orchestrator)?;

    let discovery_started = Instant::now();
    let placement = args
        .orchestrator
        .await_pod_ip(&record.job_name, args.pod_discovery_timeout)
        .instrument(tracing::debug_span!("pod_discovery"))
        .await
        .map_err(|err| match err {
            OrchestratorError::DiscoveryTimeout => {
                ::metrics::counter!(METRICS_ID_CONTROLLER_DISCOVERY_TIMEOUT).increment(1);
                // the session row stays; the expiry sweep reclaims it
                ApiError::DiscoveryTimeout(session_id)
            }
            other => ApiError::Orchestrator(other),
        })?;
    ::metrics::histogram!(METRICS_ID_CONTROLLER_DISCOVERY_DURATION)
        .record(discovery_started.elapsed().as_millis() as f64);

    let updated = args
        .store
        .update_session_pod(session_id, placement.pod_ip, &placement.pod_name)
        .await?;
    if !updated {
        return Err(ApiError::Internal("session row vanished before placement"));
    }

    let minted = args
        .minter
        .mint(&identity.owner_id, session_id, args.session_expiry)?;
    let token_expires_at = OffsetDateTime::from_unix_timestamp(minted.claims.exp)
        .map_err(|_| ApiError::Internal("token expiry out of range"))?;
    args.store
        .insert_token_id(minted.token_id, session_id, token_expires_at)
        .await?;

    ::metrics::counter!(METRICS_ID_CONTROLLER_SESSIONS_CREATED).increment(1);
    tracing::info!(pod_ip = %placement.pod_ip, "session provisioned");
    Ok(Json(CreateSessionResponse {
        session_id,
        ws_url: format!("/ws/{session_id}"),
        token: minted.token,
    }))
}

/// Returns the caller's session row.
#[instrument(level = "debug", skip_all, fields(session_id = %raw_id))]
async fn get_session(
    args: Arc<SessionArgs>,
    headers: HeaderMap,
    raw_id: String,
) -> Result<Json<SessionView>, ApiError> {
    let identity = args.auth.authenticate(&headers).await?;
    let session_id = SessionId::parse_path_segment(&raw_id)
        .map_err(|_| ApiError::Validation("invalid session id".to_owned()))?;
    let record = fetch_owned_session(&args.store, session_id, &identity.owner_id).await?;
    Ok(Json(record.into()))
}

async fn fetch_owned_session(
    store: &SessionStoreService,
    session_id: SessionId,
    owner_id: &wscli_types::OwnerId,
) -> Result<SessionRecord, ApiError> {
    let record = store
        .get_session(session_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if record.owner_id != *owner_id {
        return Err(ApiError::Forbidden);
    }
    Ok(record)
}
