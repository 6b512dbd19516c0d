use cirrus_clock::UnixTime;
use serde::Deserialize;

use super::{CredentialSource, SignedAssertion, DEFAULT_TOKEN_URI};
use crate::{
    error::{self, CredentialError},
    ClientId, ClientIdRef, ClientSecret, RefreshToken, Scopes,
};

/// Credentials for a user who has authorized an application, as written by the SDK
#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizedUser {
    client_id: ClientId,
    client_secret: ClientSecret,
    refresh_token: RefreshToken,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

impl AuthorizedUser {
    /// Constructs authorized user credentials that use the default token endpoint
    pub fn new(client_id: ClientId, client_secret: ClientSecret, refresh_token: RefreshToken) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token,
            token_uri: default_token_uri(),
        }
    }

    /// Replaces the token endpoint
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    pub(super) fn from_value(value: serde_json::Value) -> Result<Self, CredentialError> {
        serde_json::from_value(value).map_err(error::malformed_credentials)
    }

    /// The OAuth2 client ID
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The token endpoint
    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }
}

impl CredentialSource for AuthorizedUser {
    /// Scopes are fixed when the user authorizes the application, so the
    /// requested scopes are not sent.
    fn build_assertion(
        &self,
        _scopes: &Scopes,
        _issued_at: UnixTime,
    ) -> Result<SignedAssertion, CredentialError> {
        Ok(SignedAssertion::RefreshToken {
            token_uri: self.token_uri.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: self.refresh_token.clone(),
        })
    }
}
