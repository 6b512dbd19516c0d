//! Token sources

use std::sync::Arc;

use async_trait::async_trait;
use cirrus_clock::{DurationSecs, UnixTime};

use crate::{error::TokenSourceError, AccessToken, Scopes, TokenGrant};

pub mod credentials;
mod dto;

pub use credentials::CredentialsTokenSource;

/// An asynchronous source for tokens
///
/// Each call makes a single attempt. Retrying is left to the caller.
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// Requests a token from an asynchronous source
    ///
    /// `requested_at` is the time the caller considers the request to be
    /// made, and is used when signing assertions.
    async fn request_token(&self, requested_at: UnixTime) -> Result<TokenGrant, TokenSourceError>;
}

#[async_trait]
impl<S: AsyncTokenSource + ?Sized> AsyncTokenSource for Arc<S> {
    async fn request_token(&self, requested_at: UnixTime) -> Result<TokenGrant, TokenSourceError> {
        (**self).request_token(requested_at).await
    }
}

#[async_trait]
impl<S: AsyncTokenSource + ?Sized> AsyncTokenSource for Box<S> {
    async fn request_token(&self, requested_at: UnixTime) -> Result<TokenGrant, TokenSourceError> {
        (**self).request_token(requested_at).await
    }
}

/// A token source that always yields the same token
///
/// Useful for local emulators and tests, where any bearer value is accepted.
#[derive(Clone, Debug)]
pub struct ConstTokenSource {
    access_token: AccessToken,
    lifetime: DurationSecs,
    scopes: Scopes,
}

impl ConstTokenSource {
    /// Constructs a source yielding `access_token`, valid for a day at a time
    pub fn new(access_token: impl Into<AccessToken>) -> Self {
        Self {
            access_token: access_token.into(),
            lifetime: DurationSecs(86_400),
            scopes: Scopes::new(),
        }
    }

    /// Constructs a source yielding the placeholder token `fake`
    pub fn anonymous() -> Self {
        Self::new(AccessToken::from_static("fake"))
    }

    /// Sets the lifetime reported for each token
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Sets the scopes reported for each token
    pub fn with_scopes(mut self, scopes: Scopes) -> Self {
        self.scopes = scopes;
        self
    }
}

#[async_trait]
impl AsyncTokenSource for ConstTokenSource {
    async fn request_token(&self, _requested_at: UnixTime) -> Result<TokenGrant, TokenSourceError> {
        Ok(TokenGrant {
            access_token: self.access_token.clone(),
            expires_in: self.lifetime,
            scopes: self.scopes.clone(),
        })
    }
}
