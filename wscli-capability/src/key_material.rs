//! Signing key material for the controller.
//!
//! Keys are Ed25519 keypairs in PKCS#8 form. Deployments point the
//! controller at a PEM file; the `Dev` environment may fall back to a
//! freshly generated ephemeral key, which makes every restart a rotation.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::EncodingKey;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair as _};
use sha2::{Digest as _, Sha256};
use tracing::instrument;

use crate::key_set::PublicJwk;

/// Errors encountered while loading or generating key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyMaterialError {
    /// The key file could not be read.
    #[error("cannot read key material file")]
    Io(#[from] std::io::Error),
    /// The file did not contain a PKCS#8 private key PEM block.
    #[error("no PKCS#8 private key found in key material file")]
    MissingKey,
    /// The PKCS#8 document is not a usable Ed25519 key.
    #[error("key material is not a valid Ed25519 key")]
    InvalidKey,
    /// Key generation failed.
    #[error("cannot generate Ed25519 key")]
    Generate,
}

/// An Ed25519 signing key together with its derived public identity.
pub struct SigningKeyMaterial {
    kid: String,
    encoding_key: EncodingKey,
    public_key: Vec<u8>,
}

impl SigningKeyMaterial {
    /// Loads the key from a PKCS#8 PEM file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, KeyMaterialError> {
        tracing::info!("loading signing key from file..");
        let pem = std::fs::read(path)?;
        let der = rustls_pemfile::pkcs8_private_keys(&mut pem.as_slice())
            .next()
            .ok_or(KeyMaterialError::MissingKey)?
            .map_err(KeyMaterialError::Io)?;
        Self::from_pkcs8_der(der.secret_pkcs8_der())
    }

    /// Generates a fresh ephemeral keypair.
    ///
    /// Every generated key gets a new `kid`, so a restart behaves like a
    /// key rotation; only suitable for development.
    pub fn generate() -> Result<Self, KeyMaterialError> {
        let document = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
            .map_err(|_| KeyMaterialError::Generate)?;
        Self::from_pkcs8_der(document.as_ref())
    }

    /// Builds key material from a PKCS#8 DER document.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyMaterialError> {
        // accepts both v1 (seed only) and v2 (seed + public key) documents
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der)
            .map_err(|_| KeyMaterialError::InvalidKey)?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Self {
            kid: derive_kid(&public_key),
            encoding_key: EncodingKey::from_ed_der(der),
            public_key,
        })
    }

    /// The key identifier embedded in token headers and the key set.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The signing key in the form `jsonwebtoken` consumes.
    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// The public half as a key-set entry.
    pub fn public_jwk(&self) -> PublicJwk {
        PublicJwk {
            kty: "OKP".to_owned(),
            crv: "Ed25519".to_owned(),
            kid: self.kid.clone(),
            x: URL_SAFE_NO_PAD.encode(&self.public_key),
            alg: "EdDSA".to_owned(),
            key_use: "sig".to_owned(),
        }
    }
}

/// Derives a key identifier from the raw public key.
///
/// Identifiers must be globally unique across rotations; hashing the public
/// key gives that without any coordination.
fn derive_kid(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_distinct_kids() {
        let a = SigningKeyMaterial::generate().unwrap();
        let b = SigningKeyMaterial::generate().unwrap();
        assert_ne!(a.kid(), b.kid());
        assert_eq!(a.kid().len(), 16);
    }

    #[test]
    fn jwk_entry_carries_the_kid_and_raw_key() {
        let key = SigningKeyMaterial::generate().unwrap();
        let jwk = key.public_jwk();
        assert_eq!(jwk.kid, key.kid());
        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.crv, "Ed25519");
        assert_eq!(jwk.alg, "EdDSA");
        let raw = URL_SAFE_NO_PAD.decode(jwk.x.as_bytes()).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(derive_kid(&raw), key.kid());
    }
}
