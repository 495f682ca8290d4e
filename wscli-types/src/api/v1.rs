//! Version 1 of the session API.
//!
//! These are the wire types exchanged between callers and the controller
//! (`POST /api/sessions`, `GET /api/sessions/{id}`). The gateway does not
//! speak this API; it only consumes the capability token.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::session::SessionRecord;
use crate::SessionId;

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Where the sandbox fetches the workload source archive from.
    pub code_url: String,
    /// Optional SHA-256 checksum (64 hex chars) of the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_checksum: Option<String>,
    /// Command the sandbox launches after install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Optional prompt forwarded to the workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Body of a successful `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// The new session's identifier.
    pub session_id: SessionId,
    /// Gateway path the caller attaches to.
    pub ws_url: String,
    /// Single-use capability token authorizing exactly one attach.
    pub token: String,
}

/// Public projection of a session row, returned by `GET /api/sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// The session's identifier.
    pub session_id: SessionId,
    /// Orchestrator job name.
    pub job_name: String,
    /// Discovered pod name, if placement finished.
    pub pod_name: Option<String>,
    /// Discovered pod IP, if placement finished.
    pub pod_ip: Option<IpAddr>,
    /// Creation instant.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Expiry instant.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl From<SessionRecord> for SessionView {
    fn from(record: SessionRecord) -> Self {
        Self {
            session_id: record.session_id,
            job_name: record.job_name,
            pod_name: record.pod_name,
            pod_ip: record.pod_ip,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// Machine-readable error body returned for rejected API requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short machine-readable reason, e.g. `"command too long"`.
    pub error: String,
}

impl ErrorBody {
    /// Creates an error body from a reason string.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            error: reason.into(),
        }
    }
}
