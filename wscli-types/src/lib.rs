#![deny(missing_docs)]
//! Core type definitions for the WS-CLI sandbox platform.
//!
//! This crate groups together the strongly-typed values and message
//! structures shared by the session controller, the WebSocket gateway, and
//! the capability token service. It provides:
//!
//! * Thin wrappers around primitive values such as session identifiers,
//!   token identifiers, and caller identifiers, with consistent
//!   serialization and display implementations.
//! * The durable session record stored in the shared store (see
//!   [`session`] module).
//! * API versioned types for caller/controller communication (see [`api`]
//!   module).
//!
//! Use these types to pass, store, and (de)serialize identifiers in a
//! type-safe way throughout the workspace.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod api;
pub mod session;

/// Identifies one sandbox session.
///
/// Sessions are identified by a v4 UUID rendered in the lowercase hyphenated
/// form, which is the shape external callers see in URLs and API bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

/// Unique identifier of a minted capability token.
///
/// The identifier is embedded in the token as the `jti` claim and recorded
/// in the shared store; its presence in the store grants exactly one attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(Uuid);

/// Opaque identifier of the caller that owns a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing [`Uuid`].
    pub fn new(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the wrapped [`Uuid`].
    pub fn into_inner(self) -> Uuid {
        self.0
    }

    /// Derives the orchestrator job name for this session.
    ///
    /// Job names must be unique within the namespace and fit the
    /// orchestrator's DNS-label length limit, so we take a fixed prefix of
    /// the session id.
    pub fn job_name(&self) -> String {
        let rendered = self.0.to_string();
        format!("wscli-{}", &rendered[..13])
    }

    /// Parses a session id from its external path representation.
    ///
    /// The external shape is the 36-character lowercase hyphenated UUID
    /// form (`[0-9a-f-]{36}`); anything else is rejected before the value
    /// reaches the store.
    pub fn parse_path_segment(raw: &str) -> Result<Self, InvalidSessionId> {
        let shape_ok = raw.len() == 36
            && raw
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f' | b'-'));
        if !shape_ok {
            return Err(InvalidSessionId);
        }
        let uuid = Uuid::try_parse(raw).map_err(|_| InvalidSessionId)?;
        Ok(Self(uuid))
    }
}

/// Error returned when a path segment is not a well-formed session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id")]
pub struct InvalidSessionId;

impl TokenId {
    /// Generates a fresh random token id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing [`Uuid`].
    pub fn new(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the wrapped [`Uuid`].
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl OwnerId {
    /// Wraps a caller identifier. The identifier must be non-empty.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        debug_assert!(!value.is_empty(), "owner id must be non-empty");
        Self(value)
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
