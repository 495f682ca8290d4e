#![deny(missing_docs)]
//! Capability token service for WS-CLI sandbox attaches.
//!
//! The controller mints short-lived, single-use, session-bound tokens with
//! this crate and publishes the matching public key set; the gateway
//! verifies presented tokens against that key set without ever holding the
//! signing key. Single use is not enforced here — the token's unique id
//! (`jti`) is recorded in the shared store at mint time and atomically
//! consumed by the gateway at attach time.
//!
//! Tokens are compact JWS values signed with Ed25519 (`EdDSA`). The key
//! identifier in the token header always matches an entry of the published
//! key set, and identifiers are derived from the public key itself so they
//! stay unique across rotations. Rotation is done by publishing an
//! additional key-set entry and signing new tokens under the new
//! identifier; outstanding tokens keep verifying until their natural
//! expiry.
//!
//! # Modules
//!
//! - [`key_material`] – signing key loading/generation and the `kid`
//!   derivation.
//! - [`key_set`] – the published JWKS document.
//! - [`mint`] – token minting.
//! - [`verify`] – verification against a remote or local key set.

use serde::{Deserialize, Serialize};
use wscli_types::{SessionId, TokenId};

pub mod key_material;
pub mod key_set;
pub mod mint;
pub mod verify;

/// Claim set of an attach token.
///
/// `sub` is the caller identity that created the session, `sid` the session
/// binding checked against the attach URL, and `jti` the one-time
/// identifier recorded in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachClaims {
    /// Owner of the bound session.
    pub sub: String,
    /// Fixed audience, [`wscli_types::api::ATTACH_AUDIENCE`].
    pub aud: String,
    /// Session binding.
    pub sid: SessionId,
    /// One-time token identifier.
    pub jti: TokenId,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expires-at, seconds since the Unix epoch.
    pub exp: i64,
}
