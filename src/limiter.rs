//! Rate limiting for remote searches.
//!
//! The resolver calls [`RateLimit::acquire`] before every search and
//! [`RateLimit::pause_between_batches`] after every batch but the last.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::config::{RateLimitKind, SyncConfig};

pub trait RateLimit: Send + Sync {
    /// Block until one more request may be sent.
    fn acquire(&self);

    /// Block between two consecutive search batches.
    fn pause_between_batches(&self);
}

/// Fixed pause after each batch; individual requests are not limited.
pub struct BatchDelay {
    delay: Duration,
}

impl BatchDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RateLimit for BatchDelay {
    fn acquire(&self) {}

    fn pause_between_batches(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

/// Token bucket shared by every search thread.
pub struct TokenBucket {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
}

impl TokenBucket {
    pub fn per_second(requests: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(requests)),
            clock: DefaultClock::default(),
        }
    }
}

impl RateLimit for TokenBucket {
    fn acquire(&self) {
        while let Err(not_until) = self.limiter.check() {
            thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
    }

    fn pause_between_batches(&self) {}
}

/// No limiting at all, for offline catalogs.
pub struct Unlimited;

impl RateLimit for Unlimited {
    fn acquire(&self) {}
    fn pause_between_batches(&self) {}
}

pub fn from_config(config: &SyncConfig) -> Arc<dyn RateLimit> {
    match config.rate_limit.kind {
        RateLimitKind::BatchDelay => Arc::new(BatchDelay::new(config.search_delay())),
        RateLimitKind::TokenBucket => match NonZeroU32::new(config.rate_limit.requests_per_second) {
            Some(rps) => Arc::new(TokenBucket::per_second(rps)),
            None => {
                log::warn!("requests_per_second is 0; falling back to batch delay");
                Arc::new(BatchDelay::new(config.search_delay()))
            }
        },
    }
}
