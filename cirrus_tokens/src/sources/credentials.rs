//! A token source that exchanges identity credentials with a token endpoint

use std::time::Duration;

use async_trait::async_trait;
use cirrus_clock::UnixTime;

use super::{dto, AsyncTokenSource};
use crate::{
    credentials::{Credential, CredentialSource, SignedAssertion},
    error::{CredentialError, TokenEndpointError, TokenSourceError, TransportError},
    Scopes, TokenGrant,
};

const METADATA_FLAVOR: &str = "metadata-flavor";

/// Performs a single token exchange per request using a credential
///
/// The HTTP client is owned by the application and shared. This source only
/// holds a handle to it.
#[derive(Debug)]
pub struct CredentialsTokenSource<A = Credential> {
    client: reqwest::Client,
    credential: A,
    scopes: Scopes,
    timeout: Duration,
}

impl CredentialsTokenSource<Credential> {
    /// Constructs a new token source
    ///
    /// Service account credentials cannot be used without at least one scope.
    pub fn new(
        client: reqwest::Client,
        credential: Credential,
        scopes: Scopes,
    ) -> Result<Self, CredentialError> {
        if credential.requires_scopes() && scopes.is_empty() {
            return Err(CredentialError::MissingScopes);
        }

        Ok(Self::from_source(client, credential, scopes))
    }
}

impl<A> CredentialsTokenSource<A> {
    /// Constructs a token source from any credential source
    pub fn from_source(client: reqwest::Client, credential: A, scopes: Scopes) -> Self {
        Self {
            client,
            credential,
            scopes,
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The scopes requested for each token
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// The credential in use
    pub fn credential(&self) -> &A {
        &self.credential
    }
}

#[async_trait]
impl<A> AsyncTokenSource for CredentialsTokenSource<A>
where
    A: CredentialSource + Send + Sync,
{
    async fn request_token(&self, requested_at: UnixTime) -> Result<TokenGrant, TokenSourceError> {
        let assertion = self.credential.build_assertion(&self.scopes, requested_at)?;
        exchange(&self.client, &assertion, &self.scopes, self.timeout).await
    }
}

#[tracing::instrument(
    err,
    skip(client, assertion, requested_scopes),
    fields(
        token_url = %assertion.token_uri(),
        grant_type = assertion.grant_type(),
    ),
)]
async fn exchange(
    client: &reqwest::Client,
    assertion: &SignedAssertion,
    requested_scopes: &Scopes,
    timeout: Duration,
) -> Result<TokenGrant, TokenSourceError> {
    tracing::trace!("requesting token from authority");

    let endpoint = assertion.token_uri();
    let request = match assertion {
        SignedAssertion::JwtBearer {
            token_uri,
            assertion,
        } => client.post(token_uri).form(&dto::JwtBearerGrant {
            grant_type: dto::JWT_BEARER_GRANT,
            assertion,
        }),
        SignedAssertion::RefreshToken {
            token_uri,
            client_id,
            client_secret,
            refresh_token,
        } => client.post(token_uri).form(&dto::RefreshTokenGrant {
            grant_type: "refresh_token",
            client_id,
            client_secret,
            refresh_token,
        }),
        SignedAssertion::Platform { token_uri } => {
            client.get(token_uri).header(METADATA_FLAVOR, "Google")
        }
    };

    let resp = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| TransportError::new(endpoint, e))?;

    let status = resp.status().as_u16();
    tracing::debug!(
        response.status = status,
        "received token response from issuing authority"
    );

    let body = resp
        .bytes()
        .await
        .map_err(|e| TransportError::new(endpoint, e))?;

    if !(200..300).contains(&status) {
        return Err(TokenEndpointError::Rejected {
            endpoint: endpoint.to_owned(),
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
        .into());
    }

    let resp: dto::TokenResponse =
        serde_json::from_slice(&body).map_err(|e| TokenEndpointError::MalformedResponse {
            endpoint: endpoint.to_owned(),
            status,
            source: e.into(),
        })?;

    let scopes = match resp.scope {
        Some(scope) => Scopes::from_delimited(&scope),
        None => requested_scopes.clone(),
    };

    tracing::info!(
        lifetime = resp.expires_in.0,
        scopes = %scopes,
        "received new access token"
    );

    Ok(TokenGrant {
        access_token: resp.access_token,
        expires_in: resp.expires_in,
        scopes,
    })
}
