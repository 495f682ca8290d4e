//! API error categories and their response mapping.
//!
//! Every handler terminates with exactly one categorized response.
//! Admission failures carry a short machine-readable reason; infrastructure
//! failures are logged in full under the request span and collapse to an
//! opaque `500`.

use std::time::Duration;

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use wscli_capability::mint::MintError;
use wscli_store::StoreError;
use wscli_types::SessionId;
use wscli_types::api::v1::ErrorBody;

use crate::services::caller_auth::AuthError;
use crate::services::orchestrator::OrchestratorError;
use crate::services::rate_limit::RateLimited;

/// All errors a controller handler can terminate with.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("caller identity absent")]
    AuthMissing,
    #[error("caller identity not verifiable")]
    AuthInvalid,
    #[error("caller is not the session owner")]
    Forbidden,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("rate limited")]
    RateLimited(Duration),
    #[error("session not found")]
    NotFound,
    #[error("orchestrator failure")]
    Orchestrator(#[source] OrchestratorError),
    #[error("pod discovery timed out for session {0}")]
    DiscoveryTimeout(SessionId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Mint(#[from] MintError),
    #[error("{0}")]
    Internal(&'static str),
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::Missing => Self::AuthMissing,
            AuthError::Invalid => Self::AuthInvalid,
        }
    }
}

impl From<RateLimited> for ApiError {
    fn from(value: RateLimited) -> Self {
        Self::RateLimited(value.0)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::AuthMissing | Self::AuthInvalid => {
                tracing::debug!("rejecting request: {self}");
                reply(StatusCode::UNAUTHORIZED, "authentication required")
            }
            Self::Forbidden => {
                tracing::debug!("rejecting request: {self}");
                reply(StatusCode::FORBIDDEN, "not the session owner")
            }
            Self::Validation(reason) => {
                tracing::debug!("rejecting request: {reason}");
                reply(StatusCode::BAD_REQUEST, reason)
            }
            Self::RateLimited(retry_after) => {
                tracing::debug!("rejecting request: rate limited");
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after.as_secs().max(1).to_string())],
                    Json(ErrorBody::new("rate limited, retry later")),
                )
                    .into_response()
            }
            Self::NotFound => reply(StatusCode::NOT_FOUND, "session not found"),
            Self::DiscoveryTimeout(session_id) => {
                tracing::error!("pod discovery timed out for session {session_id}");
                reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("pod discovery timed out for session {session_id}"),
                )
            }
            Self::Orchestrator(err) => {
                tracing::error!("orchestrator failure: {err:?}");
                reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
            Self::Store(err) => {
                tracing::error!("store failure: {err:?}");
                reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
            Self::Mint(err) => {
                tracing::error!("token mint failure: {err:?}");
                reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
            Self::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

fn reply(status: StatusCode, reason: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(reason))).into_response()
}
