#![deny(missing_docs)]
//! Shared ephemeral store for WS-CLI sessions and one-time token ids.
//!
//! The controller and the gateway share two durable entities: the session
//! row (routing and ownership data) and the token-id row (one-time-use
//! marker for minted capability tokens). This crate defines the
//! [`SessionStore`] trait both services program against and the Postgres
//! implementation used in deployments.
//!
//! The single correctness-critical operation is
//! [`SessionStore::consume_token_id`]: it must be linearizable with respect
//! to itself so that concurrent attaches presenting the same token observe
//! at most one `true`. The Postgres implementation relies on the atomicity
//! of a single-row `DELETE`; the in-memory test implementation relies on a
//! mutex.
//!
//! Expired rows are semantically absent everywhere: reads filter on
//! `expires_at`, and cleanup (SQL triggers plus the controller's sweep
//! task) is opportunistic, never load-bearing.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use wscli_types::session::SessionRecord;
use wscli_types::{SessionId, TokenId};

pub mod postgres;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated on insert.
    #[error("duplicate {entity}")]
    Duplicate {
        /// Which entity collided (`"session"` or `"token id"`).
        entity: &'static str,
    },
    /// The backend rejected or failed the operation.
    #[error("store unavailable")]
    Backend(#[from] sqlx::Error),
}

/// Abstracted operations over the shared store.
///
/// The controller is the sole writer of sessions and token ids; the
/// gateway is the sole consumer of token ids.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a fresh session row. Fails with [`StoreError::Duplicate`] if
    /// the session id or job name already exists.
    async fn insert_session(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Records pod placement for a session.
    ///
    /// Conditional on the row existing and `pod_ip` still being unset, so
    /// the null→set transition is monotonic. Returns `true` iff a row was
    /// updated.
    async fn update_session_pod(
        &self,
        session_id: SessionId,
        pod_ip: IpAddr,
        pod_name: &str,
    ) -> Result<bool, StoreError>;

    /// Reads a session row. Expired rows read as absent.
    async fn get_session(&self, session_id: SessionId)
    -> Result<Option<SessionRecord>, StoreError>;

    /// Records a minted token id. Fails with [`StoreError::Duplicate`] if
    /// the id was already recorded.
    async fn insert_token_id(
        &self,
        token_id: TokenId,
        session_id: SessionId,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Atomically removes a token id, returning `true` iff a live row was
    /// removed. This is the single-use enforcement point; at most one
    /// concurrent caller observes `true` for the same id.
    async fn consume_token_id(&self, token_id: TokenId) -> Result<bool, StoreError>;

    /// Removes expired rows. Returns the number of rows purged.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    /// Connectivity probe for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Shared handle to a [`SessionStore`] implementation.
pub type SessionStoreService = Arc<dyn SessionStore>;
