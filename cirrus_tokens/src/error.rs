//! Error types
//!
//! A single refresh may have many callers waiting on it, and all of them
//! receive the same outcome. For that reason every error here is `Clone`,
//! with underlying sources held behind an [`Arc`].

use std::{error::Error as StdError, path::PathBuf, sync::Arc};

use cirrus_clock::DurationSecs;
use thiserror::Error;

use crate::backoff::Transient;

type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Credential material is missing or unusable, or signing failed
///
/// Credential errors are never retried.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// No private key was provided with the credentials
    #[error("credentials do not contain a private key")]
    MissingKey,
    /// The private key could not be parsed
    #[error("private key rejected")]
    MalformedKey {
        /// The underlying error
        source: SharedError,
    },
    /// The signing operation failed
    #[error("unable to sign assertion")]
    Signing {
        /// The underlying error
        source: SharedError,
    },
    /// The credentials file could not be read
    #[error("unable to read credentials file {}", .path.display())]
    Unreadable {
        /// Path to the credentials file
        path: PathBuf,
        /// The underlying error
        source: SharedError,
    },
    /// The credentials could not be parsed
    #[error("malformed credentials")]
    Malformed {
        /// The underlying error
        source: SharedError,
    },
    /// The credentials file names a type that is not supported
    #[error("'{0}' is not a supported credentials type")]
    UnsupportedType(String),
    /// Service account credentials were configured without any scopes
    #[error("scopes must be provided when using service account credentials")]
    MissingScopes,
}

#[inline]
pub(crate) fn malformed_key(source: impl Into<Box<dyn StdError + Send + Sync>>) -> CredentialError {
    CredentialError::MalformedKey {
        source: Arc::from(source.into()),
    }
}

#[inline]
pub(crate) fn signing(source: impl Into<Box<dyn StdError + Send + Sync>>) -> CredentialError {
    CredentialError::Signing {
        source: Arc::from(source.into()),
    }
}

#[inline]
pub(crate) fn unreadable(
    path: impl Into<PathBuf>,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> CredentialError {
    CredentialError::Unreadable {
        path: path.into(),
        source: Arc::from(source.into()),
    }
}

#[inline]
pub(crate) fn malformed_credentials(
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> CredentialError {
    CredentialError::Malformed {
        source: Arc::from(source.into()),
    }
}

/// A network-level failure talking to the token endpoint
#[derive(Clone, Debug, Error)]
#[error("error sending request to {endpoint}")]
pub struct TransportError {
    endpoint: String,
    source: Arc<reqwest::Error>,
}

impl TransportError {
    pub(crate) fn new(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self {
            endpoint: endpoint.into(),
            source: Arc::new(source),
        }
    }

    /// The endpoint being contacted
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// The token endpoint answered, but not with a usable token
#[derive(Clone, Debug, Error)]
pub enum TokenEndpointError {
    /// The endpoint responded with a non-success status
    #[error("token endpoint {endpoint} responded with status {status}: {body}")]
    Rejected {
        /// The endpoint contacted
        endpoint: String,
        /// The HTTP status code
        status: u16,
        /// The response body, as returned by the authority
        body: String,
    },
    /// The endpoint responded successfully, but the body could not be understood
    #[error("token endpoint {endpoint} returned a malformed token response")]
    MalformedResponse {
        /// The endpoint contacted
        endpoint: String,
        /// The HTTP status code
        status: u16,
        /// The underlying error
        source: Arc<serde_json::Error>,
    },
}

impl TokenEndpointError {
    /// The endpoint that produced the error
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Rejected { endpoint, .. } | Self::MalformedResponse { endpoint, .. } => endpoint,
        }
    }

    /// The HTTP status code returned by the endpoint
    pub fn status(&self) -> u16 {
        match self {
            Self::Rejected { status, .. } | Self::MalformedResponse { status, .. } => *status,
        }
    }
}

impl Transient for TokenEndpointError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            Self::MalformedResponse { .. } => true,
        }
    }
}

/// A failure from a single attempt at obtaining a token
#[derive(Clone, Debug, Error)]
pub enum TokenSourceError {
    /// Credential failure
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// Token endpoint failure
    #[error(transparent)]
    Endpoint(#[from] TokenEndpointError),
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TokenSourceError {
    /// The endpoint involved, if the failure got as far as contacting one
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Credential(_) => None,
            Self::Endpoint(e) => Some(e.endpoint()),
            Self::Transport(e) => Some(e.endpoint()),
        }
    }
}

impl Transient for TokenSourceError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Credential(_) => false,
            Self::Endpoint(e) => e.is_transient(),
            Self::Transport(_) => true,
        }
    }
}

/// The retry budget for a refresh was exhausted
#[derive(Clone, Debug, Error)]
#[error("token refresh failed after {attempts} attempts")]
pub struct TokenRefreshError {
    attempts: u32,
    #[source]
    last: Box<TokenSourceError>,
}

impl TokenRefreshError {
    pub(crate) fn new(attempts: u32, last: TokenSourceError) -> Self {
        Self {
            attempts,
            last: Box::new(last),
        }
    }

    /// The number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The failure observed on the final attempt
    pub fn last_error(&self) -> &TokenSourceError {
        &self.last
    }
}

/// An error obtaining a valid token from a [`TokenCache`](crate::TokenCache)
#[derive(Clone, Debug, Error)]
pub enum TokenError {
    /// Credential failure, fatal until the cache is reconstructed
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// The token endpoint rejected the request in a way that will not be retried
    #[error(transparent)]
    Endpoint(#[from] TokenEndpointError),
    /// All retries were used up
    #[error(transparent)]
    Refresh(#[from] TokenRefreshError),
    /// The granted token would not be fresh even at the moment it was received
    ///
    /// The token is discarded. The next call requests another one.
    #[error(
        "granted token lifetime of {}s does not exceed the {}s safety margin",
        .lifetime.0,
        .safety_margin.0
    )]
    LifetimeTooShort {
        /// Lifetime granted by the token endpoint
        lifetime: DurationSecs,
        /// Configured safety margin
        safety_margin: DurationSecs,
    },
    /// The cache has been closed
    #[error("token cache has been closed")]
    Closed,
    /// The refresh task went away without reporting a result
    #[error("token refresh was abandoned before it completed")]
    Abandoned,
}
