//! Compact RS256 JSON Web Tokens for service account assertions

use std::fmt;

use aliri::{
    jwa,
    jwk::{KeyId, KeyIdRef},
    jwt::HasAlgorithm,
    Jwk, Jwt,
};
use serde::Serialize;

use crate::{
    error::{self, CredentialError},
    Assertion,
};

/// An RSA private key used to sign assertions
///
/// The key is parsed once and shared between clones.
#[derive(Clone)]
pub struct SigningKey {
    key_id: Option<KeyId>,
    jwk: Jwk,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("alg", &jwa::Algorithm::RS256)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Parses a PEM-encoded RSA private key
    ///
    /// Both PKCS#8 (`PRIVATE KEY`) and PKCS#1 (`RSA PRIVATE KEY`) encodings
    /// are accepted.
    pub fn from_pem(pem: &str) -> Result<Self, CredentialError> {
        if pem.trim().is_empty() {
            return Err(CredentialError::MissingKey);
        }

        let key = jwa::rsa::PrivateKey::from_pem(pem).map_err(error::malformed_key)?;

        Ok(Self {
            key_id: None,
            jwk: Jwk::from(key).with_algorithm(jwa::Algorithm::RS256),
        })
    }

    /// Sets the key ID advertised in the `kid` header
    pub fn with_key_id(mut self, key_id: impl Into<KeyId>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// The key ID advertised in the `kid` header, if any
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// Produces a signed compact JWT over the given claims
    ///
    /// RSASSA-PKCS1-v1_5 is deterministic, so identical claims always yield
    /// an identical assertion.
    pub fn sign<P: Serialize>(&self, claims: &P) -> Result<Assertion, CredentialError> {
        let header = Header {
            alg: jwa::Algorithm::RS256,
            typ: "JWT",
            kid: self.key_id.as_deref(),
        };

        let jwt =
            Jwt::try_from_parts_with_signature(&header, claims, &self.jwk).map_err(error::signing)?;

        Ok(Assertion::new(jwt.take()))
    }

    #[cfg(test)]
    pub(crate) fn jwk(&self) -> &Jwk {
        &self.jwk
    }
}

#[derive(Serialize)]
struct Header<'a> {
    alg: jwa::Algorithm,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a KeyIdRef>,
}

impl HasAlgorithm for Header<'_> {
    fn alg(&self) -> jwa::Algorithm {
        self.alg
    }
}
