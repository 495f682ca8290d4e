//! The published public key set document.
//!
//! Served by the controller under `/.well-known/jwks.json` and consumed by
//! the gateway's [`verify`](crate::verify) module, which parses the same
//! bytes through `jsonwebtoken`'s JWK support.

use serde::{Deserialize, Serialize};

/// One public key entry of the key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    /// Key type, always `OKP` for Ed25519.
    pub kty: String,
    /// Curve, always `Ed25519`.
    pub crv: String,
    /// Key identifier matching the token header `kid`.
    pub kid: String,
    /// Base64url-encoded raw public key.
    pub x: String,
    /// Signature algorithm, always `EdDSA`.
    pub alg: String,
    /// Key usage, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
}

/// The key set document: all currently-valid verification keys.
///
/// Rotation appends a new entry; entries stay published until no token
/// signed under them can still be alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeySet {
    /// The published keys.
    pub keys: Vec<PublicJwk>,
}

impl PublicKeySet {
    /// Builds a key set from entries.
    pub fn new(keys: Vec<PublicJwk>) -> Self {
        Self { keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_set_serializes_with_the_use_member() {
        let set = PublicKeySet::new(vec![PublicJwk {
            kty: "OKP".to_owned(),
            crv: "Ed25519".to_owned(),
            kid: "abc123".to_owned(),
            x: "AAAA".to_owned(),
            alg: "EdDSA".to_owned(),
            key_use: "sig".to_owned(),
        }]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["keys"][0]["use"], "sig");
        assert_eq!(json["keys"][0]["kty"], "OKP");

        let parsed: PublicKeySet = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, set);
    }
}
