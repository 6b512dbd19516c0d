//! Bearer authorization for cloud API calls made with `reqwest`
//!
//! [`AccessTokenMiddleware`] sits in a
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware) stack
//! and asks a shared [`TokenCache`] for a fresh token on every outgoing
//! request. Requests that already carry an `Authorization` header are sent
//! untouched, so a caller can always override the token for one request.
//!
//! ```
//! use cirrus_reqwest::AccessTokenMiddleware;
//! use cirrus_tokens::TokenCache;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! # use cirrus_tokens::sources::ConstTokenSource;
//! #
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let token_source = ConstTokenSource::new("token");
//! let token_cache = TokenCache::new(token_source);
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(token_cache))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! Tokens are only attached to HTTPS requests by default. A different
//! [`predicates`] predicate over the request can be supplied instead, for
//! instance to keep a token from reaching hosts other than the API it was
//! issued for:
//!
//! ```
//! use cirrus_reqwest::{
//!     AccessTokenMiddleware, ExactHostMatch, HttpsOnly
//! };
//! use predicates::prelude::PredicateBooleanExt;
//! # use cirrus_tokens::{sources::ConstTokenSource, TokenCache};
//! # let token_cache = TokenCache::new(ConstTokenSource::new("token"));
//!
//! AccessTokenMiddleware::new(token_cache)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("example.com")));
//! ```
//!
//! For calling resource APIs with typed request and response bodies, see
//! [`ResourceClient`].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bytes::{BufMut, BytesMut};
use cirrus_clock::{Clock, System};
use cirrus_tokens::{sources::AsyncTokenSource, Token, TokenCache};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

mod client;
mod error;

pub use client::{ResourceClient, Schema};
pub use error::{Direction, ErrorProto, ErrorResponse, RequestError, ValidationError};

/// Attaches a bearer token from a [`TokenCache`] to outgoing requests
pub struct AccessTokenMiddleware<S, C = System, P = HttpsOnly> {
    token_cache: TokenCache<S, C>,
    predicate: P,
}

impl<S, C, P: Clone> Clone for AccessTokenMiddleware<S, C, P> {
    fn clone(&self) -> Self {
        Self {
            token_cache: self.token_cache.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<S, C, P: fmt::Debug> fmt::Debug for AccessTokenMiddleware<S, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("token_cache", &self.token_cache)
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl<S, C> AccessTokenMiddleware<S, C, HttpsOnly> {
    /// Wraps a token cache, attaching tokens to HTTPS requests only
    pub fn new(token_cache: TokenCache<S, C>) -> Self {
        Self {
            token_cache,
            predicate: HttpsOnly,
        }
    }

    /// Decides per request whether a token is attached
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<S, C, P> {
        AccessTokenMiddleware {
            token_cache: self.token_cache,
            predicate,
        }
    }
}

impl<S, C, P> AccessTokenMiddleware<S, C, P>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn authorization(&self) -> Result<header::HeaderValue> {
        let token = self
            .token_cache
            .get()
            .await
            .map_err(reqwest_middleware::Error::middleware)?;

        self.trace_token(&token);

        let raw = token.access_token().as_str();
        let mut value = BytesMut::with_capacity(BEARER.len() + raw.len());
        value.put_slice(BEARER);
        value.put_slice(raw.as_bytes());

        let mut value = header::HeaderValue::from_maybe_shared(value.freeze())
            .map_err(reqwest_middleware::Error::middleware)?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn trace_token(&self, token: &Token) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }

        let now = self.token_cache.clock().now();
        tracing::trace!(
            token.status = ?token.token_status_at(now),
            token.issued = token.issued().0,
            token.stale = token.stale().0,
            token.until_stale = token.until_stale_at(now).0,
            token.expiry = token.expiry().0,
            token.until_expired = token.until_expired_at(now).0,
            "attaching access token"
        );
    }
}

const BEARER: &[u8] = b"Bearer ";

#[async_trait::async_trait]
impl<S, C, P> Middleware for AccessTokenMiddleware<S, C, P>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let value = self.authorization().await?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

fn mismatch<'a>(
    predicate: &'a dyn reflection::PredicateReflection,
    expected: bool,
    actual: bool,
    product: &'static str,
    observed: &str,
) -> Option<reflection::Case<'a>> {
    (actual != expected).then(|| {
        reflection::Case::new(Some(predicate), actual)
            .add_product(reflection::Product::new(product, observed.to_owned()))
    })
}

/// Matches requests sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "scheme", req.url().scheme())
    }
}

impl reflection::PredicateReflection for HttpsOnly {}

impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Matches requests addressed to exactly one host
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Matches requests to `host`, compared without port or scheme
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let observed = req.url().host_str().unwrap_or("<no host>");
        mismatch(self, expected, self.eval(req), "host", observed)
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}

impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host is {}", self.host)
    }
}
