//! The durable session record shared by the controller and the gateway.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{OwnerId, SessionId};

/// One row of the `sessions` table.
///
/// Written by the controller, read by both services. `pod_name` and
/// `pod_ip` start out unset and are filled in exactly once after pod
/// discovery; the store enforces that the transition is monotonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Primary key.
    pub session_id: SessionId,
    /// The caller that created the session.
    pub owner_id: OwnerId,
    /// Orchestrator job name, unique within the namespace.
    pub job_name: String,
    /// Name of the discovered sandbox pod.
    pub pod_name: Option<String>,
    /// Cluster IP of the discovered sandbox pod.
    pub pod_ip: Option<IpAddr>,
    /// Creation instant.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Absolute expiry; a row past this instant is semantically absent.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl SessionRecord {
    /// Creates a fresh record without pod placement.
    pub fn new(
        session_id: SessionId,
        owner_id: OwnerId,
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        debug_assert!(expires_at > created_at);
        Self {
            job_name: session_id.job_name(),
            session_id,
            owner_id,
            pod_name: None,
            pod_ip: None,
            created_at,
            expires_at,
        }
    }

    /// Returns `true` once the expiry instant has passed.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}
