//! Token minting.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Header};
use time::OffsetDateTime;
use tracing::instrument;
use wscli_types::api::ATTACH_AUDIENCE;
use wscli_types::{OwnerId, SessionId, TokenId};

use crate::AttachClaims;
use crate::key_material::SigningKeyMaterial;

/// Errors encountered while minting a token.
#[derive(Debug, thiserror::Error)]
pub enum MintError {
    /// Signing failed.
    #[error("cannot sign attach token")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// A freshly minted token together with its one-time identifier.
///
/// The caller records `token_id` in the shared store before handing
/// `token` out; a token whose id was never recorded can never attach.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// The `jti` embedded in the token.
    pub token_id: TokenId,
    /// The compact signed token.
    pub token: String,
    /// The claims that were signed.
    pub claims: AttachClaims,
}

/// Mints attach tokens under a single signing key.
#[derive(Clone)]
pub struct TokenMinter {
    key: Arc<SigningKeyMaterial>,
}

impl TokenMinter {
    /// Creates a minter over the given key material.
    pub fn new(key: Arc<SigningKeyMaterial>) -> Self {
        Self { key }
    }

    /// The key material backing this minter.
    pub fn key(&self) -> &SigningKeyMaterial {
        &self.key
    }

    /// Mints a token binding `subject` to one attach on `session_id`.
    ///
    /// Every call draws a fresh random `jti`; two calls never return the
    /// same identifier.
    #[instrument(level = "debug", skip_all, fields(session_id = %session_id))]
    pub fn mint(
        &self,
        subject: &OwnerId,
        session_id: SessionId,
        ttl: Duration,
    ) -> Result<MintedToken, MintError> {
        let token_id = TokenId::generate();
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AttachClaims {
            sub: subject.as_str().to_owned(),
            aud: ATTACH_AUDIENCE.to_owned(),
            sid: session_id,
            jti: token_id,
            iat,
            exp: iat + ttl.as_secs() as i64,
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.key.kid().to_owned());
        let token = jsonwebtoken::encode(&header, &claims, self.key.encoding_key())?;

        Ok(MintedToken {
            token_id,
            token,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_draws_fresh_token_ids() {
        let minter = TokenMinter::new(Arc::new(SigningKeyMaterial::generate().unwrap()));
        let owner = OwnerId::new("caller-1");
        let session = SessionId::generate();
        let a = minter
            .mint(&owner, session, Duration::from_secs(600))
            .unwrap();
        let b = minter
            .mint(&owner, session, Duration::from_secs(600))
            .unwrap();
        assert_ne!(a.token_id, b.token_id);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn minted_header_carries_the_published_kid() {
        let minter = TokenMinter::new(Arc::new(SigningKeyMaterial::generate().unwrap()));
        let minted = minter
            .mint(
                &OwnerId::new("caller-1"),
                SessionId::generate(),
                Duration::from_secs(600),
            )
            .unwrap();
        let header = jsonwebtoken::decode_header(&minted.token).unwrap();
        assert_eq!(header.alg, Algorithm::EdDSA);
        assert_eq!(header.kid.as_deref(), Some(minter.key().kid()));
    }
}
