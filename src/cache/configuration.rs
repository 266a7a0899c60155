//! Tunable limits and the injectable clock.

use std::{
    fmt, sync::Arc,
    time::{Duration, SystemTime},
};

/// Buffering cap, in bytes, per response. Responses whose body exceeds this
/// are forwarded normally but never cached.
const DEFAULT_MAXIMUM_CACHED_BODY_SIZE: usize = 64 * 1024;

/// Threshold, in bytes, above which a response body is stored in its own
/// entry rather than colocated with the response metadata. A body of exactly
/// this size is still colocated; splitting starts at the next byte.
const DEFAULT_MINIMUM_SPLIT_BODY_SIZE: usize = 70 * 1024 - 1;

/// Freshness lifetime assumed when the response computes none of its own
/// (`s-maxage`, `max-age`, `Expires`).
const DEFAULT_EXPIRATION: Duration = Duration::from_secs(10);

/// A source of the current UTC instant, injectable so tests can control time.
pub trait SystemClock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// [`SystemClock`] backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl SystemClock for RealClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Tunable limits for a [`CacheService`](crate::CacheService).
#[derive(Clone)]
pub struct CacheConfiguration {
    pub(crate) maximum_cached_body_size: usize,
    pub(crate) minimum_split_body_size: usize,
    pub(crate) default_expiration: Duration,
    pub(crate) clock: Arc<dyn SystemClock>,
}

impl CacheConfiguration {
    pub fn maximum_cached_body_size(&self) -> usize {
        self.maximum_cached_body_size
    }

    pub fn minimum_split_body_size(&self) -> usize {
        self.minimum_split_body_size
    }

    pub fn default_expiration(&self) -> Duration {
        self.default_expiration
    }

    pub fn clock(&self) -> &Arc<dyn SystemClock> {
        &self.clock
    }
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            maximum_cached_body_size: DEFAULT_MAXIMUM_CACHED_BODY_SIZE,
            minimum_split_body_size: DEFAULT_MINIMUM_SPLIT_BODY_SIZE,
            default_expiration: DEFAULT_EXPIRATION,
            clock: Arc::new(RealClock),
        }
    }
}

impl fmt::Debug for CacheConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfiguration")
            .field("maximum_cached_body_size", &self.maximum_cached_body_size)
            .field("minimum_split_body_size", &self.minimum_split_body_size)
            .field("default_expiration", &self.default_expiration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let configuration = CacheConfiguration::default();
        assert_eq!(configuration.maximum_cached_body_size(), 64 * 1024);
        assert_eq!(configuration.minimum_split_body_size(), 70 * 1024 - 1);
        assert_eq!(configuration.default_expiration(), Duration::from_secs(10));
    }
}
