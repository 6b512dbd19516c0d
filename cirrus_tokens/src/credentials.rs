//! Identity credentials and the assertions they produce
//!
//! A [`Credential`] knows how to describe the exchange needed to obtain an
//! access token, but never performs any I/O itself. The exchange is carried
//! out by a [token source](crate::sources).

use std::path::Path;

use cirrus_clock::UnixTime;
use serde::Deserialize;

use crate::{error, error::CredentialError, Assertion, ClientId, ClientSecret, RefreshToken, Scopes};

mod authorized_user;
mod discovery;
mod metadata;
mod service_account;

pub use authorized_user::AuthorizedUser;
pub use discovery::{discover, discover_with, APPLICATION_CREDENTIALS_ENV, SDK_CONFIG_ENV};
pub use metadata::{MetadataServer, METADATA_TOKEN_URI};
pub use service_account::ServiceAccountKey;

/// The default OAuth2 token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A source of assertions that can be exchanged for an access token
pub trait CredentialSource {
    /// Describes the exchange that will yield a token for `scopes`
    ///
    /// This is pure: no network access happens here, and identical inputs
    /// produce identical outputs.
    fn build_assertion(
        &self,
        scopes: &Scopes,
        issued_at: UnixTime,
    ) -> Result<SignedAssertion, CredentialError>;
}

/// An exchange to perform against a token endpoint
#[derive(Clone, Debug)]
pub enum SignedAssertion {
    /// POST a signed JWT using the `jwt-bearer` grant
    JwtBearer {
        /// The token endpoint
        token_uri: String,
        /// The signed JWT
        assertion: Assertion,
    },
    /// POST a `refresh_token` grant
    RefreshToken {
        /// The token endpoint
        token_uri: String,
        /// The OAuth2 client ID
        client_id: ClientId,
        /// The OAuth2 client secret
        client_secret: ClientSecret,
        /// The long-lived refresh token
        refresh_token: RefreshToken,
    },
    /// GET a token issued to the ambient platform identity
    Platform {
        /// The metadata server's token endpoint
        token_uri: String,
    },
}

impl SignedAssertion {
    /// The endpoint the exchange is made against
    pub fn token_uri(&self) -> &str {
        match self {
            Self::JwtBearer { token_uri, .. }
            | Self::RefreshToken { token_uri, .. }
            | Self::Platform { token_uri } => token_uri,
        }
    }

    /// A short name for the kind of exchange, suitable for logging
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::JwtBearer { .. } => "jwt_bearer",
            Self::RefreshToken { .. } => "refresh_token",
            Self::Platform { .. } => "metadata",
        }
    }
}

/// A supported identity credential
#[derive(Clone, Debug)]
pub enum Credential {
    /// A service account that signs its own assertions
    ServiceAccount(ServiceAccountKey),
    /// A user that has authorized an application with a refresh token
    AuthorizedUser(AuthorizedUser),
    /// The identity of the platform the process is running on
    Metadata(MetadataServer),
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

impl Credential {
    /// Parses a JSON credentials document, using its `type` field to select a strategy
    pub fn from_json(json: &[u8]) -> Result<Self, CredentialError> {
        let value: serde_json::Value =
            serde_json::from_slice(json).map_err(error::malformed_credentials)?;
        let tag = TypeTag::deserialize(&value).map_err(error::malformed_credentials)?;

        match tag.kind.as_str() {
            "service_account" => Ok(Self::ServiceAccount(ServiceAccountKey::from_value(value)?)),
            "authorized_user" => Ok(Self::AuthorizedUser(AuthorizedUser::from_value(value)?)),
            "gce_metadata" => Ok(Self::Metadata(MetadataServer::from_value(value)?)),
            _ => Err(CredentialError::UnsupportedType(tag.kind)),
        }
    }

    /// Reads and parses a JSON credentials file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let json = std::fs::read(path).map_err(|e| error::unreadable(path, e))?;
        Self::from_json(&json)
    }

    /// The `type` name of this credential
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceAccount(_) => "service_account",
            Self::AuthorizedUser(_) => "authorized_user",
            Self::Metadata(_) => "gce_metadata",
        }
    }

    /// Whether tokens cannot be requested for this credential without scopes
    pub fn requires_scopes(&self) -> bool {
        matches!(self, Self::ServiceAccount(_))
    }
}

impl CredentialSource for Credential {
    fn build_assertion(
        &self,
        scopes: &Scopes,
        issued_at: UnixTime,
    ) -> Result<SignedAssertion, CredentialError> {
        match self {
            Self::ServiceAccount(c) => c.build_assertion(scopes, issued_at),
            Self::AuthorizedUser(c) => c.build_assertion(scopes, issued_at),
            Self::Metadata(c) => c.build_assertion(scopes, issued_at),
        }
    }
}

impl From<ServiceAccountKey> for Credential {
    fn from(c: ServiceAccountKey) -> Self {
        Self::ServiceAccount(c)
    }
}

impl From<AuthorizedUser> for Credential {
    fn from(c: AuthorizedUser) -> Self {
        Self::AuthorizedUser(c)
    }
}

impl From<MetadataServer> for Credential {
    fn from(c: MetadataServer) -> Self {
        Self::Metadata(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn selects_strategy_by_type() {
        let sa = Credential::from_json(test::service_account_json(DEFAULT_TOKEN_URI).as_bytes())
            .unwrap();
        assert_eq!(sa.kind(), "service_account");
        assert!(sa.requires_scopes());

        let user = Credential::from_json(test::AUTHORIZED_USER_JSON.as_bytes()).unwrap();
        assert_eq!(user.kind(), "authorized_user");
        assert!(!user.requires_scopes());
    }

    #[test]
    fn unknown_types_are_rejected() {
        let err = Credential::from_json(br#"{"type":"external_account"}"#).unwrap_err();
        assert!(
            matches!(&err, CredentialError::UnsupportedType(t) if t == "external_account"),
            "{err:?}"
        );
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = Credential::from_json(br#"{"client_id":"abc"}"#).unwrap_err();
        assert!(matches!(err, CredentialError::Malformed { .. }), "{err:?}");

        let err = Credential::from_json(b"{").unwrap_err();
        assert!(matches!(err, CredentialError::Malformed { .. }), "{err:?}");
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let err = Credential::from_file(&path).unwrap_err();
        assert!(
            matches!(&err, CredentialError::Unreadable { path: p, .. } if *p == path),
            "{err:?}"
        );
    }

    #[test]
    fn assertions_name_their_endpoint() {
        let metadata = Credential::from(MetadataServer::default());
        let assertion = metadata
            .build_assertion(&Scopes::new(), UnixTime(0))
            .unwrap();
        assert_eq!(assertion.token_uri(), METADATA_TOKEN_URI);
        assert_eq!(assertion.grant_type(), "metadata");
    }
}
