use cirrus_clock::UnixTime;
use serde::Deserialize;

use super::{CredentialSource, SignedAssertion};
use crate::{
    error::{self, CredentialError},
    Scopes,
};

/// The metadata server endpoint that issues tokens for the default service account
pub const METADATA_TOKEN_URI: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token?recursive=true";

/// The identity of the platform the process is running on
///
/// Tokens are issued by the platform's metadata server rather than being
/// signed locally.
#[derive(Clone, Debug, Deserialize)]
pub struct MetadataServer {
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    METADATA_TOKEN_URI.to_owned()
}

impl Default for MetadataServer {
    fn default() -> Self {
        Self {
            token_uri: default_token_uri(),
        }
    }
}

impl MetadataServer {
    /// Uses a metadata server at a non-default location
    pub fn with_token_uri(token_uri: impl Into<String>) -> Self {
        Self {
            token_uri: token_uri.into(),
        }
    }

    pub(super) fn from_value(value: serde_json::Value) -> Result<Self, CredentialError> {
        serde_json::from_value(value).map_err(error::malformed_credentials)
    }

    /// The token endpoint
    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }
}

impl CredentialSource for MetadataServer {
    fn build_assertion(
        &self,
        _scopes: &Scopes,
        _issued_at: UnixTime,
    ) -> Result<SignedAssertion, CredentialError> {
        Ok(SignedAssertion::Platform {
            token_uri: self.token_uri.clone(),
        })
    }
}
