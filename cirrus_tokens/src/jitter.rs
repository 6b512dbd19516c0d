//! Utilities for adding a bit of jitter to reduce stampeding

use std::time::Duration;

/// A type that provides some jittering of delays
pub trait JitterSource {
    /// Jitters a given delay
    fn jitter(&self, delay: Duration) -> Duration;
}

/// A jitter source that does not do any jittering
#[derive(Clone, Copy, Debug)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&self, delay: Duration) -> Duration {
        delay
    }
}

#[cfg(feature = "rand")]
mod random {
    use std::time::Duration;

    use rand::Rng;

    /// Shortens a delay by a random fraction of itself
    ///
    /// Delays jittered by this type have a uniform distribution in the
    /// interval `[delay * (1 - ratio), delay]`.
    #[derive(Clone, Copy, Debug)]
    pub struct RandomJitter {
        ratio: f64,
    }

    impl RandomJitter {
        /// Constructs a new instance that will shorten delays by up to `ratio`
        ///
        /// `ratio` is clamped to `[0, 1]`.
        pub fn new(ratio: f64) -> Self {
            Self {
                ratio: ratio.clamp(0.0, 1.0),
            }
        }
    }

    impl super::JitterSource for RandomJitter {
        fn jitter(&self, delay: Duration) -> Duration {
            if self.ratio <= 0.0 {
                return delay;
            }
            let factor = rand::thread_rng().gen_range((1.0 - self.ratio)..=1.0);
            delay.mul_f64(factor)
        }
    }

}

#[cfg(feature = "rand")]
pub use random::RandomJitter;
