//! Per-request state threaded through the serve-from-cache and
//! capture-and-store paths. Constructed at request entry, discarded at exit;
//! never shared across requests.

use {
    super::codec::CachedVaryRules,
    std::time::{Duration, SystemTime},
};

/// Per-invocation state, scoped to what this crate's synchronous-handoff
/// model actually needs (stream bookkeeping folds into
/// [`BufferingBody`](super::body::BufferingBody) itself instead of living
/// here, since Rust's ownership makes it implicit).
#[derive(Debug, Default)]
pub(crate) struct RequestContext {
    /// Set once, either when a cached entry's age is computed on a hit or
    /// when the upstream response is received on a miss.
    pub response_time: Option<SystemTime>,

    /// Vary rules discovered while probing the base key, whether or not they
    /// ultimately led to a served response. Reused (not replaced) at
    /// header-finalization time when the newly computed vary signature
    /// matches.
    pub cached_vary_rules: Option<CachedVaryRules>,

    /// The entry's age as of `response_time`, present once a candidate
    /// response has been loaded.
    pub cached_entry_age: Option<Duration>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }
}
