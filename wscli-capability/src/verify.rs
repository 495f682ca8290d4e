//! Token verification against a remotely published key set.
//!
//! The gateway never holds the signing key; it fetches the key set from the
//! controller's well-known location at first use and caches decoding keys
//! by key identifier. A token referring to a not-yet-seen identifier
//! triggers exactly one refetch before the token is rejected, which is what
//! makes rotation-by-publication work without redeploying the gateway.
//!
//! The same machinery verifies caller identity tokens from an external
//! provider, so RSA and EC keys are accepted in fetched key sets alongside
//! the Ed25519 keys WS-CLI itself publishes.

use std::collections::HashMap;
use std::str::FromStr as _;

use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use parking_lot::RwLock;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::instrument;
use wscli_types::api::ATTACH_AUDIENCE;

use crate::AttachClaims;

/// Errors encountered while verifying a token.
///
/// The variants are deliberately distinct so callers can log the precise
/// rejection reason; none of them is ever echoed to the peer.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token is not a parseable compact JWS (or its claims do not
    /// deserialize).
    #[error("malformed token")]
    Malformed,
    /// The token header does not name a key identifier.
    #[error("token header does not specify a kid")]
    MissingKeyId,
    /// The named key identifier is not in the published key set.
    #[error("token uses unknown key {0:?}")]
    UnknownKeyId(String),
    /// The signature does not verify under the named key.
    #[error("token signature mismatch")]
    Signature,
    /// The token's expiry has passed (or is this very second).
    #[error("token expired")]
    Expired,
    /// The audience claim does not match the expected audience.
    #[error("token audience mismatch")]
    Audience,
    /// The issuer claim does not match the configured issuer.
    #[error("token issuer mismatch")]
    Issuer,
    /// The key set could not be fetched.
    #[error("cannot fetch key set")]
    KeySetFetch(#[source] reqwest::Error),
    /// The fetched document is not a usable key set.
    #[error("cannot parse key set")]
    KeySetParse,
}

#[derive(Clone)]
struct CachedKey {
    decoding: DecodingKey,
    algorithm: Algorithm,
}

/// Builds decoding keys from a parsed JWK set, skipping entries we cannot
/// use.
fn keys_from_jwk_set(jwks: &JwkSet) -> HashMap<String, CachedKey> {
    let mut keys = HashMap::new();
    for jwk in &jwks.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            tracing::warn!("key set entry without kid, skipping");
            continue;
        };
        let algorithm = jwk
            .common
            .key_algorithm
            .and_then(|alg| Algorithm::from_str(alg.to_string().as_str()).ok());
        let Some(algorithm) = algorithm else {
            tracing::warn!(%kid, "key set entry without usable alg, skipping");
            continue;
        };
        let decoding = match &jwk.algorithm {
            AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x),
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y)
            }
            other => {
                tracing::warn!(%kid, "unsupported key type in key set: {other:?}");
                continue;
            }
        };
        match decoding {
            Ok(decoding) => {
                keys.insert(
                    kid,
                    CachedKey {
                        decoding,
                        algorithm,
                    },
                );
            }
            Err(err) => {
                tracing::warn!(%kid, "cannot build decoding key from key set entry: {err:?}");
            }
        }
    }
    keys
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidAudience => VerifyError::Audience,
        ErrorKind::InvalidIssuer => VerifyError::Issuer,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => VerifyError::Signature,
        _ => VerifyError::Malformed,
    }
}

/// Minimal claim set of an external identity token.
#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
}

/// Verifier over a remotely published key set.
///
/// The cache is write-only after the first fetch per key identifier; it can
/// be [`reset`](Self::reset) if an operator needs to force a refetch.
pub struct RemoteKeySet {
    url: String,
    http: reqwest::Client,
    expected_issuer: Option<String>,
    keys: RwLock<HashMap<String, CachedKey>>,
}

impl RemoteKeySet {
    /// Creates a verifier fetching from `url` (a `/.well-known/jwks.json`
    /// style location).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            expected_issuer: None,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Additionally requires the `iss` claim to equal `issuer`.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Verifies a sandbox attach token.
    ///
    /// `exp` is valid strictly into the future: a token expiring this very
    /// second is already unusable.
    #[instrument(level = "debug", skip_all)]
    pub async fn verify_attach(&self, token: &str) -> Result<AttachClaims, VerifyError> {
        let claims: AttachClaims = self.verify(token, ATTACH_AUDIENCE).await?;
        if claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(VerifyError::Expired);
        }
        Ok(claims)
    }

    /// Verifies an external identity token and returns its subject.
    #[instrument(level = "debug", skip_all)]
    pub async fn verify_subject(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<String, VerifyError> {
        let claims: IdentityClaims = self.verify(token, expected_audience).await?;
        Ok(claims.sub)
    }

    /// Verifies `token` against the key named in its header, expecting
    /// `expected_audience`, and deserializes the claim set.
    pub async fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<T, VerifyError> {
        let header = decode_header(token).map_err(|_| VerifyError::Malformed)?;
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;

        let cached = self.keys.read().get(&kid).cloned();
        let key = match cached {
            Some(key) => key,
            None => {
                self.refresh().await?;
                self.keys
                    .read()
                    .get(&kid)
                    .cloned()
                    .ok_or_else(|| VerifyError::UnknownKeyId(kid.clone()))?
            }
        };

        let mut validation = Validation::new(key.algorithm);
        validation.leeway = 0;
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        if let Some(issuer) = &self.expected_issuer {
            validation.set_issuer(std::slice::from_ref(issuer));
        }

        let data = decode::<T>(token, &key.decoding, &validation).map_err(map_decode_error)?;
        Ok(data.claims)
    }

    /// Drops all cached keys; the next verification refetches.
    pub fn reset(&self) {
        self.keys.write().clear();
    }

    #[instrument(level = "debug", skip_all, fields(url = %self.url))]
    async fn refresh(&self) -> Result<(), VerifyError> {
        tracing::debug!("fetching key set..");
        let jwks: JwkSet = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(VerifyError::KeySetFetch)?
            .json()
            .await
            .map_err(|_| VerifyError::KeySetParse)?;

        let fresh = keys_from_jwk_set(&jwks);
        tracing::debug!("key set carries {} usable key(s)", fresh.len());
        let mut keys = self.keys.write();
        for (kid, key) in fresh {
            // existing entries are never replaced: kids are content-derived
            keys.entry(kid).or_insert(key);
        }
        Ok(())
    }
}
