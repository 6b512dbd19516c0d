//! Acquisition, caching and refresh of access tokens for cloud APIs
//!
//! Many tasks in an application typically need the same short-lived bearer
//! token. This crate lets them share one, without serializing every caller
//! behind a lock and without issuing redundant requests to the token
//! authority when the token needs replacing.
//!
//! The pieces are:
//!
//! * A [`Credential`][credentials::Credential], which knows how to describe
//!   an exchange with the token authority: signing a JWT for a service
//!   account, presenting a refresh token for an authorized user, or asking the
//!   platform's metadata server.
//! * An [`AsyncTokenSource`][sources::AsyncTokenSource], which performs a
//!   single exchange. [`CredentialsTokenSource`][sources::CredentialsTokenSource]
//!   does this over HTTP using an application-provided [`reqwest::Client`].
//! * A [`RetryPolicy`][backoff::RetryPolicy], which retries transient
//!   failures with exponential backoff and jitter.
//! * A [`TokenCache`], which hands out the cached token while it is fresh and
//!   otherwise runs a single refresh that every concurrent caller waits on.
//!
//! # General Flow
//!
//! ```
//! use cirrus_tokens::{
//!     credentials, scopes::CLOUD_PLATFORM, sources::CredentialsTokenSource, Scopes, TokenCache,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = credentials::discover(None)?;
//! let source = CredentialsTokenSource::new(
//!     reqwest::Client::new(),
//!     credential,
//!     Scopes::single(CLOUD_PLATFORM),
//! )?;
//!
//! let cache = TokenCache::new(source);
//!
//! let token = cache.get().await?;
//! tracing::info!(
//!     token = format_args!("{:#?}", token.access_token()),
//!     expiry = token.expiry().0,
//!     "obtained access token"
//! );
//!
//! cache.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! The cache is cheap to clone and is intended to be shared by the whole
//! application. Tokens are considered stale a safety margin (60 seconds by
//! default) before they expire, and are never handed out once stale.
//!
//! # Features
//!
//! * `rand`: Provides for an implementation of [JitterSource][jitter::JitterSource] based on the
//!   random number generator provided by the [rand] crate. Enabled by default.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
mod cache;
pub mod credentials;
pub mod error;
pub mod jitter;
pub mod jwt;
pub mod scopes;
pub mod sources;
mod tokens;


pub use braids::*;
pub use cache::{TokenCache, TokenCacheBuilder};
pub use error::TokenError;
pub use scopes::Scopes;
pub use tokens::{Token, TokenGrant, TokenLifetimeConfig, TokenStatus};
