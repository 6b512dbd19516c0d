//! A shared, single-flight token cache

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arc_swap::ArcSwapOption;
use cirrus_clock::{Clock, DurationSecs, System, UnixTime};
use tokio::sync::watch;

use crate::{
    backoff::{RetryError, RetryPolicy},
    error::{CredentialError, TokenError, TokenRefreshError, TokenSourceError},
    sources::AsyncTokenSource,
    Token, TokenLifetimeConfig, TokenStatus,
};

type RefreshOutcome = Option<Result<Arc<Token>, TokenError>>;

/// Caches an access token and refreshes it on demand
///
/// Any number of tasks may call [`get`](Self::get) concurrently. A fresh
/// token is returned without waiting. When the token is missing or stale,
/// exactly one refresh is started and every caller that needs a token
/// while it runs waits on that same refresh.
///
/// Refreshes run as spawned tasks, so a caller that stops waiting does not
/// cancel the refresh for anyone else.
///
/// Clones share the same underlying cache.
pub struct TokenCache<S, C = System> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for TokenCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, C> {
    current: ArcSwapOption<Token>,
    source: ArcSwapOption<S>,
    state: Mutex<State>,
    retry: RetryPolicy,
    lifetime: TokenLifetimeConfig<C>,
}

#[derive(Default)]
struct State {
    in_flight: Option<watch::Receiver<RefreshOutcome>>,
    poisoned: Option<CredentialError>,
    closed: bool,
}

enum Lookup {
    Fresh(Arc<Token>),
    Wait(watch::Receiver<RefreshOutcome>),
}

impl<S, C> fmt::Debug for TokenCache<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("TokenCache")
            .field("current", &self.inner.current.load_full())
            .field("refreshing", &state.in_flight.is_some())
            .field("poisoned", &state.poisoned)
            .field("closed", &state.closed)
            .field("retry", &self.inner.retry)
            .field("safety_margin", &self.inner.lifetime.safety_margin())
            .finish()
    }
}

/// Builder for a [`TokenCache`]
pub struct TokenCacheBuilder<S, C = System> {
    source: S,
    retry: RetryPolicy,
    lifetime: TokenLifetimeConfig<C>,
}

impl<S, C: fmt::Debug> fmt::Debug for TokenCacheBuilder<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCacheBuilder")
            .field("retry", &self.retry)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl<S> TokenCacheBuilder<S> {
    fn new(source: S) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
            lifetime: TokenLifetimeConfig::default(),
        }
    }
}

impl<S, C> TokenCacheBuilder<S, C> {
    /// Sets how long before expiry a token stops being handed out
    pub fn with_safety_margin(mut self, safety_margin: DurationSecs) -> Self {
        self.lifetime = self.lifetime.with_safety_margin(safety_margin);
        self
    }

    /// Sets the policy used to retry failed refreshes
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the clock used to stamp and check tokens
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenCacheBuilder<S, D> {
        TokenCacheBuilder {
            source: self.source,
            retry: self.retry,
            lifetime: self.lifetime.with_clock(clock),
        }
    }

    /// Constructs the cache
    ///
    /// No token is requested until the first call to [`TokenCache::get`].
    pub fn build(self) -> TokenCache<S, C> {
        TokenCache {
            inner: Arc::new(Inner {
                current: ArcSwapOption::empty(),
                source: ArcSwapOption::from_pointee(self.source),
                state: Mutex::new(State::default()),
                retry: self.retry,
                lifetime: self.lifetime,
            }),
        }
    }
}

impl<S> TokenCache<S> {
    /// Constructs a cache with the default configuration
    pub fn new(source: S) -> Self {
        Self::builder(source).build()
    }

    /// Starts building a cache around `source`
    pub fn builder(source: S) -> TokenCacheBuilder<S> {
        TokenCacheBuilder::new(source)
    }
}

impl<S, C> TokenCache<S, C> {
    /// The cached token, if any, regardless of whether it is still fresh
    pub fn current(&self) -> Option<Arc<Token>> {
        self.inner.current.load_full()
    }

    /// The clock used to stamp and check tokens
    pub fn clock(&self) -> &C {
        self.inner.lifetime.clock()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Shuts the cache down
    ///
    /// Any refresh in progress is allowed to finish so that its waiters
    /// receive a result. Afterwards the cached token and the token source are
    /// released and every call to [`get`](Self::get) fails with
    /// [`TokenError::Closed`]. Closing an already closed cache does nothing.
    pub async fn close(&self) {
        let in_flight = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.in_flight.clone()
        };

        if let Some(mut rx) = in_flight {
            tracing::debug!("waiting for in-flight refresh before closing");
            let _ = rx.wait_for(Option::is_some).await;
        }

        self.inner.current.store(None);
        self.inner.source.store(None);
        tracing::debug!("token cache closed");
    }
}

impl<S, C> TokenCache<S, C>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Gets a fresh token, refreshing it first if necessary
    ///
    /// The returned token is fresh at the moment it is returned. If the
    /// refresh fails, the error is returned and any previously cached token is
    /// left in place, but it is never returned from here once stale.
    pub async fn get(&self) -> Result<Arc<Token>, TokenError> {
        if let Some(token) = self.inner.fresh_token() {
            tracing::trace!(expiry = token.expiry().0, "using cached token");
            return Ok(token);
        }

        let mut rx = match self.join_or_start_refresh()? {
            Lookup::Fresh(token) => return Ok(token),
            Lookup::Wait(rx) => rx,
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or(Err(TokenError::Abandoned))
    }

    fn join_or_start_refresh(&self) -> Result<Lookup, TokenError> {
        let mut state = self.inner.lock_state();

        if state.closed {
            return Err(TokenError::Closed);
        }

        if let Some(error) = &state.poisoned {
            return Err(error.clone().into());
        }

        if let Some(token) = self.inner.fresh_token() {
            return Ok(Lookup::Fresh(token));
        }

        if let Some(rx) = &state.in_flight {
            if rx.has_changed().is_ok() || rx.borrow().is_some() {
                tracing::trace!("joining in-flight refresh");
                return Ok(Lookup::Wait(rx.clone()));
            }
            tracing::warn!("previous refresh was abandoned, starting another");
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());
        drop(state);

        tracing::debug!(
            has_token = self.inner.current.load().is_some(),
            "token missing or stale, starting refresh"
        );
        tokio::spawn(refresh(Arc::clone(&self.inner), tx));

        Ok(Lookup::Wait(rx))
    }
}

async fn refresh<S, C>(inner: Arc<Inner<S, C>>, tx: watch::Sender<RefreshOutcome>)
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    let outcome = inner.request_new_token().await;

    {
        let mut state = inner.lock_state();
        if let Err(TokenError::Credential(error)) = &outcome {
            tracing::error!(%error, "credentials are unusable, no further refreshes will be made");
            state.poisoned = Some(error.clone());
        }
        state.in_flight = None;
    }

    tx.send_replace(Some(outcome));
}

impl<S, C> Inner<S, C> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `token` unless a token issued later is already cached
    ///
    /// Returns whichever token ends up cached.
    fn install(&self, token: Arc<Token>) -> Arc<Token> {
        let previous = self.current.rcu(|current| match current {
            Some(existing) if existing.issued() > token.issued() => Some(Arc::clone(existing)),
            _ => Some(Arc::clone(&token)),
        });

        match previous {
            Some(existing) if existing.issued() > token.issued() => {
                tracing::debug!(
                    kept_issued = existing.issued().0,
                    discarded_issued = token.issued().0,
                    "discarding token older than the cached one"
                );
                existing
            }
            _ => token,
        }
    }
}

impl<S, C> Inner<S, C>
where
    S: AsyncTokenSource,
    C: Clock,
{
    fn now(&self) -> UnixTime {
        self.lifetime.clock().now()
    }

    fn fresh_token(&self) -> Option<Arc<Token>> {
        let now = self.now();
        self.current
            .load_full()
            .filter(|t| t.token_status_at(now) == TokenStatus::Fresh)
    }

    async fn request_new_token(&self) -> Result<Arc<Token>, TokenError> {
        let source = self.source.load_full().ok_or(TokenError::Closed)?;

        let result = self
            .retry
            .retry(|| source.request_token(self.now()))
            .await;

        match result {
            Ok(grant) => {
                let token = self.lifetime.create_token(grant);
                if token.token_status_at(self.now()) != TokenStatus::Fresh {
                    tracing::warn!(
                        lifetime = token.lifetime().0,
                        safety_margin = self.lifetime.safety_margin().0,
                        "discarding token that is not fresh on receipt"
                    );
                    return Err(TokenError::LifetimeTooShort {
                        lifetime: token.lifetime(),
                        safety_margin: self.lifetime.safety_margin(),
                    });
                }

                tracing::info!(
                    lifetime = token.lifetime().0,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "installing refreshed token"
                );
                Ok(self.install(Arc::new(token)))
            }
            Err(RetryError::Fatal(TokenSourceError::Credential(error))) => Err(error.into()),
            Err(RetryError::Fatal(TokenSourceError::Endpoint(error))) => Err(error.into()),
            Err(RetryError::Fatal(error)) => Err(TokenRefreshError::new(1, error).into()),
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(TokenRefreshError::new(attempts, last).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use cirrus_clock::TestClock;
    use serde_json::json;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{
        backoff::ErrorBackoffConfig,
        credentials::AuthorizedUser,
        error::TokenEndpointError,
        sources::{ConstTokenSource, CredentialsTokenSource},
        AccessToken, ClientId, ClientSecret, RefreshToken, Scopes, TokenGrant,
    };

    const START: UnixTime = UnixTime(1_700_000_000);

    /// Hands out `token-1`, `token-2`, ... after an optional delay
    #[derive(Clone, Default)]
    struct CountingSource {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl CountingSource {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AsyncTokenSource for CountingSource {
        async fn request_token(&self, _: UnixTime) -> Result<TokenGrant, TokenSourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(TokenGrant {
                access_token: AccessToken::new(format!("token-{n}")),
                expires_in: DurationSecs(3600),
                scopes: Scopes::new(),
            })
        }
    }

    /// Always fails with an unusable credential
    #[derive(Clone, Default)]
    struct BrokenCredentials {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncTokenSource for BrokenCredentials {
        async fn request_token(&self, _: UnixTime) -> Result<TokenGrant, TokenSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CredentialError::MissingKey.into())
        }
    }

    /// Panics on the first request, then behaves
    #[derive(Clone, Default)]
    struct PanicsOnce {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncTokenSource for PanicsOnce {
        async fn request_token(&self, _: UnixTime) -> Result<TokenGrant, TokenSourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("token source blew up");
            }
            Ok(TokenGrant {
                access_token: AccessToken::from_static("recovered"),
                expires_in: DurationSecs(3600),
                scopes: Scopes::new(),
            })
        }
    }

    fn quick_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            ErrorBackoffConfig::new(Duration::from_millis(1), Duration::from_millis(5), 2),
            max_retries,
        )
    }

    fn cache_with<S>(source: S, clock: &TestClock) -> TokenCache<S, TestClock> {
        TokenCache::builder(source)
            .with_retry_policy(quick_retries(3))
            .with_clock(clock.clone())
            .build()
    }

    fn http_source(server: &MockServer) -> CredentialsTokenSource {
        let credential = AuthorizedUser::new(
            ClientId::from_static("client"),
            ClientSecret::from_static("secret"),
            RefreshToken::from_static("1//refresh"),
        )
        .with_token_uri(format!("{}/token", server.uri()));

        CredentialsTokenSource::new(
            reqwest::Client::new(),
            credential.into(),
            Scopes::from_delimited("read write"),
        )
        .unwrap()
    }

    fn token_response(access_token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "expires_in": 3600,
            "scope": "read write",
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let clock = TestClock::new(START);
        let source = CountingSource::with_delay(Duration::from_millis(50));
        let cache = cache_with(source.clone(), &clock);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(source.calls(), 1);
        assert!(tokens.iter().all(|t| Arc::ptr_eq(t, &tokens[0])));
        assert_eq!(tokens[0].access_token().as_str(), "token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_tokens_are_served_from_cache() {
        let clock = TestClock::new(START);
        let source = CountingSource::default();
        let cache = cache_with(source.clone(), &clock);

        let first = cache.get().await.unwrap();
        for _ in 0..10 {
            clock.inc(60);
            let again = cache.get().await.unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_once_inside_the_safety_margin() {
        let clock = TestClock::new(START);
        let source = CountingSource::default();
        let cache = cache_with(source.clone(), &clock);

        cache.get().await.unwrap();

        clock.set(START + DurationSecs(10));
        assert_eq!(cache.get().await.unwrap().access_token().as_str(), "token-1");

        clock.set(START + DurationSecs(3538));
        assert_eq!(cache.get().await.unwrap().access_token().as_str(), "token-1");
        assert_eq!(source.calls(), 1);

        clock.set(START + DurationSecs(3539));
        let refreshed = cache.get().await.unwrap();
        assert_eq!(refreshed.access_token().as_str(), "token-2");
        assert_eq!(refreshed.issued(), START + DurationSecs(3539));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiters_do_not_cancel_the_refresh() {
        let clock = TestClock::new(START);
        let source = CountingSource::with_delay(Duration::from_millis(100));
        let cache = cache_with(source.clone(), &clock);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.get()).await;
        assert!(abandoned.is_err());

        let token = cache.get().await.unwrap();
        assert_eq!(token.access_token().as_str(), "token-1");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_errors_are_sticky() {
        let clock = TestClock::new(START);
        let source = BrokenCredentials::default();
        let cache = cache_with(source.clone(), &clock);

        for _ in 0..3 {
            let err = cache.get().await.unwrap_err();
            assert!(
                matches!(err, TokenError::Credential(CredentialError::MissingKey)),
                "{err:?}"
            );
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_refreshes_are_reported_and_replaced() {
        let clock = TestClock::new(START);
        let source = PanicsOnce::default();
        let cache = cache_with(source.clone(), &clock);

        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, TokenError::Abandoned), "{err:?}");

        let token = cache.get().await.unwrap();
        assert_eq!(token.access_token().as_str(), "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let clock = TestClock::new(START);
        let cache = cache_with(CountingSource::default(), &clock);

        cache.get().await.unwrap();
        cache.close().await;
        cache.close().await;

        assert!(cache.is_closed());
        assert!(cache.current().is_none());
        assert!(matches!(cache.get().await, Err(TokenError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_lets_in_flight_refresh_finish() {
        let clock = TestClock::new(START);
        let source = CountingSource::with_delay(Duration::from_millis(100));
        let cache = cache_with(source.clone(), &clock);

        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get().await }
        });
        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }

        cache.close().await;

        let token = waiter.await.unwrap().unwrap();
        assert_eq!(token.access_token().as_str(), "token-1");
        assert!(matches!(cache.get().await, Err(TokenError::Closed)));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn older_tokens_never_replace_newer_ones() {
        let clock = TestClock::new(START);
        let cache = cache_with(CountingSource::default(), &clock);
        let config = TokenLifetimeConfig::default();
        let grant = |name: &'static str| TokenGrant {
            access_token: AccessToken::from_static(name),
            expires_in: DurationSecs(3600),
            scopes: Scopes::new(),
        };

        let newer = Arc::new(config.create_token_at(grant("newer"), START + DurationSecs(100)));
        let older = Arc::new(config.create_token_at(grant("older"), START));

        cache.inner.install(Arc::clone(&newer));
        let kept = cache.inner.install(older);

        assert!(Arc::ptr_eq(&kept, &newer));
        assert_eq!(cache.current().unwrap().access_token().as_str(), "newer");

        let same_time = Arc::new(config.create_token_at(grant("same"), START + DurationSecs(100)));
        let kept = cache.inner.install(Arc::clone(&same_time));
        assert!(Arc::ptr_eq(&kept, &same_time));
    }

    #[tokio::test]
    async fn token_response_is_stamped_with_receipt_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(token_response("abc"))
            .expect(1)
            .mount(&server)
            .await;

        let clock = TestClock::new(START);
        let cache = cache_with(http_source(&server), &clock);

        let token = cache.get().await.unwrap();
        assert_eq!(token.access_token().as_str(), "abc");
        assert_eq!(token.scopes(), &Scopes::from_delimited("read write"));
        assert_eq!(token.expiry(), START + DurationSecs(3600));
        assert_eq!(token.token_status_at(START), TokenStatus::Fresh);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_transparently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(token_response("abc"))
            .expect(1)
            .mount(&server)
            .await;

        let clock = TestClock::new(START);
        let cache = cache_with(http_source(&server), &clock);

        let token = cache.get().await.unwrap();
        assert_eq!(token.access_token().as_str(), "abc");
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unauthorized_fails_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .expect(1)
            .mount(&server)
            .await;

        let clock = TestClock::new(START);
        let cache = cache_with(http_source(&server), &clock);

        let err = cache.get().await.unwrap_err();
        assert!(
            matches!(
                err,
                TokenError::Endpoint(TokenEndpointError::Rejected { status: 401, .. })
            ),
            "{err:?}"
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_keep_the_previous_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(token_response("first"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(token_response("second"))
            .mount(&server)
            .await;

        let clock = TestClock::new(START);
        let cache = TokenCache::builder(http_source(&server))
            .with_retry_policy(quick_retries(2))
            .with_clock(clock.clone())
            .build();

        assert_eq!(cache.get().await.unwrap().access_token().as_str(), "first");

        clock.set(START + DurationSecs(3600));
        let err = cache.get().await.unwrap_err();
        match &err {
            TokenError::Refresh(refresh) => {
                assert_eq!(refresh.attempts(), 3);
                let endpoint = format!("{}/token", server.uri());
                assert_eq!(refresh.last_error().endpoint(), Some(endpoint.as_str()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cache.current().unwrap().access_token().as_str(), "first");

        assert_eq!(cache.get().await.unwrap().access_token().as_str(), "second");
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn grants_that_are_not_fresh_on_receipt_are_refused() {
        for lifetime in [0, 30, 61] {
            let clock = TestClock::new(START);
            let source =
                ConstTokenSource::new("short-lived").with_lifetime(DurationSecs(lifetime));
            let cache = cache_with(source, &clock);

            let err = cache.get().await.unwrap_err();
            match err {
                TokenError::LifetimeTooShort {
                    lifetime: granted,
                    safety_margin,
                } => {
                    assert_eq!(granted, DurationSecs(lifetime));
                    assert_eq!(safety_margin, DurationSecs(60));
                }
                other => panic!("unexpected error for {lifetime}s: {other:?}"),
            }
            assert!(cache.current().is_none(), "{lifetime}s token was cached");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shortest_usable_grant_is_fresh_when_returned() {
        let clock = TestClock::new(START);
        let source = ConstTokenSource::new("brief").with_lifetime(DurationSecs(62));
        let cache = cache_with(source, &clock);

        let token = cache.get().await.unwrap();
        assert_eq!(token.token_status_at(START), TokenStatus::Fresh);
        assert_eq!(token.stale(), START + DurationSecs(1));
    }

    #[tokio::test]
    async fn exhausted_retries_reach_every_waiter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(20)))
            .expect(3)
            .mount(&server)
            .await;

        let clock = TestClock::new(START);
        let cache = TokenCache::builder(http_source(&server))
            .with_retry_policy(quick_retries(2))
            .with_clock(clock.clone())
            .build();

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        for waiter in waiters {
            match waiter.await.unwrap() {
                Err(TokenError::Refresh(refresh)) => assert_eq!(refresh.attempts(), 3),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn fatal_rejections_reach_every_waiter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string("invalid_client")
                    .set_delay(Duration::from_millis(20)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let clock = TestClock::new(START);
        let cache = cache_with(http_source(&server), &clock);

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        for waiter in waiters {
            let outcome = waiter.await.unwrap();
            assert!(
                matches!(
                    outcome,
                    Err(TokenError::Endpoint(TokenEndpointError::Rejected { status: 401, .. }))
                ),
                "{outcome:?}"
            );
        }

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
