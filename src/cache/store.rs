//! The external byte store boundary, and a typed wrapper applying the
//! [entry codec](super::codec) at each crossing.

#[cfg(feature = "moka")]
pub mod moka;

use {
    super::codec::{self, Entry},
    bytes::Bytes,
    std::time::Duration,
};

/// An external `(key → bytes, ttl)` store.
///
/// Treated as a monotonic key/value service: concurrent `set`s to the same
/// key race last-writer-wins, `get` may return any consistent value seen so
/// far, and no transactional guarantees are assumed.
///
/// Implementations should ensure cloning is cheap and every clone refers to
/// the same shared state, the same contract `moka::future::Cache` itself
/// documents.
#[allow(async_fn_in_trait)]
pub trait ByteStore: 'static + Clone + Send + Sync {
    /// Written as a longhand `impl Future` so the `Send` bound can be named;
    /// implementations can write this as a plain `async fn`.
    fn get(&self, key: &str) -> impl Future<Output = Option<Bytes>> + Send;

    /// Written as a longhand `impl Future` so the `Send` bound can be named;
    /// implementations can write this as a plain `async fn`.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = ()> + Send;
}

/// Applies the [entry codec](super::codec) on each boundary crossing of a
/// [`ByteStore`].
///
/// Any codec failure on read is logged and treated as a miss, never surfaced
/// as a request failure, per the store wrapper's error contract.
#[derive(Clone)]
pub struct TypedStore<S> {
    store: S,
}

impl<S> TypedStore<S>
where
    S: ByteStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Fetches and deserializes the entry at `key`. A deserialization failure
    /// is logged and treated the same as an absent entry.
    pub async fn get(&self, key: &str) -> Option<Entry> {
        let bytes = self.store.get(key).await?;
        let entry = codec::deserialize(Some(&bytes));
        if entry.is_none() {
            tracing::debug!("cache entry failed to deserialize, treating as miss: {}", key);
        }
        entry
    }

    /// Serializes and stores `entry` at `key` with the given TTL. A
    /// serialization failure (unreachable for the entries this crate
    /// constructs) is logged and the write is skipped.
    pub async fn set(&self, key: &str, entry: &Entry, ttl: Duration) {
        match codec::serialize(Some(entry)) {
            Ok(bytes) => self.store.set(key, bytes, ttl).await,
            Err(error) => tracing::error!("failed to serialize cache entry ({}): {}", key, error),
        }
    }
}
