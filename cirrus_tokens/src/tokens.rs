use cirrus_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, Scopes};

/// A token as returned by the authority, stamped with lifetime information
///
/// Tokens are immutable once issued. A refresh produces a new token that
/// supersedes this one rather than modifying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    access_token: AccessToken,
    scopes: Scopes,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// The raw result of a single exchange with a token endpoint
///
/// A grant carries no notion of when it was received. It becomes a
/// [`Token`] once stamped by a [`TokenLifetimeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// The access token
    pub access_token: AccessToken,
    /// How long the token is valid for, as stated by the authority
    pub expires_in: DurationSecs,
    /// The scopes the token was issued for
    pub scopes: Scopes,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but is within its safety margin and should be refreshed
    Stale,
    /// The token is no longer valid
    Expired,
}

impl Token {
    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the scopes this token was issued for
    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Gets the token's lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will become stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the interval during which the token should be considered fresh
    #[inline]
    pub fn fresh_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.stale
    }

    /// Gets the interval during which the token is valid
    #[inline]
    pub fn valid_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.expiry
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        self.stale - time
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// Configuration for determining how long a token should be considered fresh
///
/// The final second of a token's validity is `expiry - 1`. A token stays
/// fresh only while more than `safety_margin` seconds remain before that
/// final second, so a one hour token with the default margin goes stale
/// 3539 seconds after it was issued.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    safety_margin: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a safety margin of 60 seconds and the system clock.
    fn default() -> Self {
        Self {
            safety_margin: DurationSecs(60),
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration using the system clock
    pub fn new(safety_margin: DurationSecs) -> Self {
        Self {
            safety_margin,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Replaces the clock used to stamp tokens
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            safety_margin: self.safety_margin,
            clock,
        }
    }

    /// Replaces the safety margin
    pub fn with_safety_margin(mut self, safety_margin: DurationSecs) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// The configured safety margin
    pub fn safety_margin(&self) -> DurationSecs {
        self.safety_margin
    }

    /// The configured clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn time_to_stale(&self, issued: UnixTime, expiry: UnixTime) -> UnixTime {
        let last_usable = expiry - DurationSecs(1);
        Ord::max(last_usable - self.safety_margin, issued)
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Stamps a grant received from the authority, treating now as its issue time
    pub fn create_token(&self, grant: TokenGrant) -> Token {
        self.create_token_at(grant, self.clock.now())
    }

    /// Stamps a grant received from the authority at the given time
    pub fn create_token_at(&self, grant: TokenGrant, issued: UnixTime) -> Token {
        let expiry = issued + grant.expires_in;
        Token {
            access_token: grant.access_token,
            scopes: grant.scopes,
            lifetime: grant.expires_in,
            issued,
            stale: self.time_to_stale(issued, expiry),
            expiry,
        }
    }
}
