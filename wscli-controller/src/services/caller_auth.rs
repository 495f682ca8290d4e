//! Caller authentication.
//!
//! Two interchangeable strategies sit behind the [`CallerAuthenticator`]
//! trait: static API keys configured on the controller, and bearer identity
//! tokens minted by an external provider and verified against that
//! provider's key set. A deployment picks exactly one via
//! `--caller-auth-mode`. The gateway never sees caller identities; the
//! resulting [`OwnerId`] only lives in the session row and the attach
//! token's `sub` claim.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use secrecy::{ExposeSecret as _, SecretString};
use tracing::instrument;
use wscli_capability::verify::RemoteKeySet;
use wscli_types::OwnerId;

/// Errors on the caller authentication path.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credentials were presented.
    #[error("missing credentials")]
    Missing,
    /// Credentials were presented but did not verify.
    #[error("invalid credentials")]
    Invalid,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// Opaque identifier the session is owned by.
    pub owner_id: OwnerId,
}

/// Strategy seam for caller admission.
#[async_trait]
pub trait CallerAuthenticator: Send + Sync {
    /// Authenticates the caller from the request headers.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity, AuthError>;
}

/// Shared handle to a [`CallerAuthenticator`].
pub type CallerAuthService = Arc<dyn CallerAuthenticator>;

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::Missing)?;
    let value = value.to_str().map_err(|_| AuthError::Invalid)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Invalid)
}

/// Authenticates against static `name:secret` API keys.
pub struct ApiKeyAuthenticator {
    keys: Vec<(String, String)>,
}

impl ApiKeyAuthenticator {
    /// Parses the configured comma-separated `name:secret` pairs.
    pub fn from_config(raw: &SecretString) -> eyre::Result<Self> {
        let mut keys = Vec::new();
        for entry in raw.expose_secret().split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, secret) = entry
                .split_once(':')
                .ok_or_else(|| eyre::eyre!("API key entries must be name:secret pairs"))?;
            if name.is_empty() || secret.is_empty() {
                eyre::bail!("API key entries must be name:secret pairs");
            }
            keys.push((name.to_owned(), secret.to_owned()));
        }
        if keys.is_empty() {
            eyre::bail!("api-key auth mode requires at least one API key");
        }
        Ok(Self { keys })
    }
}

#[async_trait]
impl CallerAuthenticator for ApiKeyAuthenticator {
    #[instrument(level = "debug", skip_all)]
    async fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity, AuthError> {
        let presented = bearer_token(headers)?;
        // compare every entry so timing does not leak which key matched
        let mut matched = None;
        for (name, secret) in &self.keys {
            if ring::constant_time::verify_slices_are_equal(
                presented.as_bytes(),
                secret.as_bytes(),
            )
            .is_ok()
            {
                matched = Some(name.clone());
            }
        }
        match matched {
            Some(name) => Ok(CallerIdentity {
                owner_id: OwnerId::new(name),
            }),
            None => Err(AuthError::Invalid),
        }
    }
}

/// Authenticates bearer identity tokens from an external provider.
pub struct IdentityTokenAuthenticator {
    key_set: RemoteKeySet,
    audience: String,
}

impl IdentityTokenAuthenticator {
    /// Creates an authenticator over the provider's key set URL.
    pub fn new(jwks_url: String, issuer: Option<String>, audience: String) -> Self {
        let mut key_set = RemoteKeySet::new(jwks_url);
        if let Some(issuer) = issuer {
            key_set = key_set.with_issuer(issuer);
        }
        Self { key_set, audience }
    }
}

#[async_trait]
impl CallerAuthenticator for IdentityTokenAuthenticator {
    #[instrument(level = "debug", skip_all)]
    async fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity, AuthError> {
        let token = bearer_token(headers)?;
        let subject = self
            .key_set
            .verify_subject(token, &self.audience)
            .await
            .map_err(|err| {
                tracing::debug!("identity token rejected: {err:?}");
                AuthError::Invalid
            })?;
        Ok(CallerIdentity {
            owner_id: OwnerId::new(subject),
        })
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn authenticator() -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::from_config(&SecretString::from("alice:s3cret,bob:other"))
            .expect("valid config")
    }

    #[tokio::test]
    async fn api_key_resolves_to_its_name() {
        let identity = authenticator()
            .authenticate(&headers(Some("Bearer s3cret")))
            .await
            .unwrap();
        assert_eq!(identity.owner_id.as_str(), "alice");

        let identity = authenticator()
            .authenticate(&headers(Some("Bearer other")))
            .await
            .unwrap();
        assert_eq!(identity.owner_id.as_str(), "bob");
    }

    #[tokio::test]
    async fn missing_and_malformed_credentials_are_distinct() {
        let auth = authenticator();
        assert!(matches!(
            auth.authenticate(&headers(None)).await.unwrap_err(),
            AuthError::Missing
        ));
        assert!(matches!(
            auth.authenticate(&headers(Some("Basic abc"))).await.unwrap_err(),
            AuthError::Invalid
        ));
        assert!(matches!(
            auth.authenticate(&headers(Some("Bearer wrong"))).await.unwrap_err(),
            AuthError::Invalid
        ));
        assert!(matches!(
            auth.authenticate(&headers(Some("Bearer "))).await.unwrap_err(),
            AuthError::Invalid
        ));
    }

    #[test]
    fn api_key_config_rejects_entries_without_names() {
        assert!(ApiKeyAuthenticator::from_config(&SecretString::from("")).is_err());
        assert!(ApiKeyAuthenticator::from_config(&SecretString::from("just-a-secret")).is_err());
        assert!(ApiKeyAuthenticator::from_config(&SecretString::from(":nope")).is_err());
    }
}
