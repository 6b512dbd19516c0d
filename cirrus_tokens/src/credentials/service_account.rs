use cirrus_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use super::{CredentialSource, SignedAssertion, DEFAULT_TOKEN_URI};
use crate::{
    error::{self, CredentialError},
    jwt::SigningKey,
    Issuer, IssuerRef, Scopes,
};

/// How long a signed assertion remains valid
const ASSERTION_LIFETIME: DurationSecs = DurationSecs(3600);

/// A service account key, able to sign its own JWT assertions
#[derive(Clone, Debug)]
pub struct ServiceAccountKey {
    client_email: Issuer,
    project_id: Option<String>,
    signing_key: SigningKey,
    token_uri: String,
}

#[derive(Deserialize)]
struct ServiceAccountDto {
    client_email: Issuer,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a IssuerRef,
    scope: String,
    aud: &'a str,
    iat: UnixTime,
    exp: UnixTime,
}

impl ServiceAccountKey {
    /// Constructs a service account key that uses the default token endpoint
    pub fn new(client_email: Issuer, signing_key: SigningKey) -> Self {
        Self {
            client_email,
            project_id: None,
            signing_key,
            token_uri: DEFAULT_TOKEN_URI.to_owned(),
        }
    }

    /// Replaces the token endpoint
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    pub(super) fn from_value(value: serde_json::Value) -> Result<Self, CredentialError> {
        let dto: ServiceAccountDto =
            serde_json::from_value(value).map_err(error::malformed_credentials)?;

        let pem = dto
            .private_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(CredentialError::MissingKey)?;
        let mut signing_key = SigningKey::from_pem(&pem)?;
        if let Some(kid) = dto.private_key_id {
            signing_key = signing_key.with_key_id(kid);
        }

        Ok(Self {
            client_email: dto.client_email,
            project_id: dto.project_id,
            signing_key,
            token_uri: dto.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
        })
    }

    /// The service account's email, used as the assertion issuer
    pub fn client_email(&self) -> &IssuerRef {
        &self.client_email
    }

    /// The project the service account belongs to, if known
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// The token endpoint assertions are addressed to
    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }
}

impl CredentialSource for ServiceAccountKey {
    fn build_assertion(
        &self,
        scopes: &Scopes,
        issued_at: UnixTime,
    ) -> Result<SignedAssertion, CredentialError> {
        if scopes.is_empty() {
            return Err(CredentialError::MissingScopes);
        }

        let claims = Claims {
            iss: &self.client_email,
            scope: scopes.to_string(),
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME,
        };

        Ok(SignedAssertion::JwtBearer {
            token_uri: self.token_uri.clone(),
            assertion: self.signing_key.sign(&claims)?,
        })
    }
}
