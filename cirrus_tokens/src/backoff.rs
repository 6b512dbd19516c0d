//! Error backoff and retry handling

use std::{fmt, future::Future, sync::Arc, time::Duration};

use crate::jitter::{JitterSource, NullJitter};

/// Configuration for how to manage backoff when an error is encountered
#[derive(Clone, Debug)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u64,
}

impl Default for ErrorBackoffConfig {
    /// Default backoff configuration
    ///
    /// Uses an initial error delay of 100 ms with a multiplier of 2. Maximum delay is
    /// capped at 15 seconds.
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_millis(100),
            max_error_delay: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// When encountering an error for the first time, the backoff will be `initial_error_delay`.
    /// On subsequent errors, the backoff should be multiplied by `multiplier`, with a cap of
    /// `max_error_delay`.
    pub fn new(initial_error_delay: Duration, max_error_delay: Duration, multiplier: u64) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
        }
    }
}

/// A stateful handler that manages error backoff state
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler from an [`ErrorBackoffConfig`].
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a success
    ///
    /// This resets the internal delay state.
    pub fn success(&mut self) {
        self.last_delay = None;
    }

    /// Reports a failure and returns the expected backoff delay
    ///
    /// This will apply the values in the backoff configuration, increasing the backoff delay
    /// if required, and then report the expected next delay.
    pub fn error(&mut self) -> Duration {
        let new_delay = self
            .last_delay
            .map(|s: Duration| {
                s.saturating_mul(u32::try_from(self.config.multiplier).unwrap_or(u32::MAX))
                    .min(self.config.max_error_delay)
            })
            .unwrap_or(self.config.initial_error_delay);
        self.last_delay = Some(new_delay);
        new_delay
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}

/// Classifies failures that are worth another attempt
pub trait Transient {
    /// Whether retrying the failed operation may succeed
    fn is_transient(&self) -> bool;
}

/// The outcome of an operation that could not be completed under a [`RetryPolicy`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A non-transient failure, returned without retrying
    Fatal(E),
    /// Every permitted attempt failed with a transient error
    Exhausted {
        /// Total number of attempts made
        attempts: u32,
        /// The error from the final attempt
        last: E,
    },
}

/// Bounded exponential backoff with jitter
///
/// Cloning a policy is cheap. Each call to [`retry`](Self::retry) tracks its
/// own backoff state, so one policy can drive many concurrent operations.
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: ErrorBackoffConfig,
    max_retries: u32,
    jitter: Arc<dyn JitterSource + Send + Sync>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    /// Default retry policy
    ///
    /// Uses the default [`ErrorBackoffConfig`], retries up to 3 times, and
    /// shortens each delay by up to 20% at random.
    fn default() -> Self {
        #[cfg(feature = "rand")]
        let jitter: Arc<dyn JitterSource + Send + Sync> =
            Arc::new(crate::jitter::RandomJitter::new(0.2));
        #[cfg(not(feature = "rand"))]
        let jitter: Arc<dyn JitterSource + Send + Sync> = Arc::new(NullJitter);

        Self {
            backoff: ErrorBackoffConfig::default(),
            max_retries: 3,
            jitter,
        }
    }
}

impl RetryPolicy {
    /// Constructs a new retry policy without jitter
    pub fn new(backoff: ErrorBackoffConfig, max_retries: u32) -> Self {
        Self {
            backoff,
            max_retries,
            jitter: Arc::new(NullJitter),
        }
    }

    /// A policy that makes a single attempt
    pub fn never() -> Self {
        Self::new(ErrorBackoffConfig::default(), 0)
    }

    /// Replaces the jitter source applied to each delay
    pub fn with_jitter(mut self, jitter: impl JitterSource + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// The maximum number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `operation` until it succeeds, fails fatally, or the retry budget is spent
    pub async fn retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        let mut handler = ErrorBackoffHandler::new(self.backoff.clone());
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    handler.success();
                    return Ok(value);
                }
                Err(error) if !error.is_transient() => {
                    tracing::debug!(attempt, %error, "non-transient failure, not retrying");
                    return Err(RetryError::Fatal(error));
                }
                Err(error) if attempt > self.max_retries => {
                    tracing::error!(attempts = attempt, %error, "all attempts failed");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) => {
                    let delay = self.jitter.jitter(handler.error());
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "attempt failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
