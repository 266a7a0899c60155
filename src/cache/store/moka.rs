//! [`ByteStore`] backed by an in-process [`moka`] cache.
//!
//! Caches this crate's opaque `(key → bytes, ttl)` pairs directly rather than
//! a typed value: per-entry TTL is carried alongside the bytes and applied
//! through a [`moka::Expiry`] implementation, since `moka` has no per-entry
//! TTL parameter on `insert` itself.

use {
    super::ByteStore,
    bytes::Bytes,
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
};

#[derive(Clone)]
struct Entry {
    value: Bytes,
    ttl: Duration,
}

struct EntryExpiry;

impl moka::Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// A [`ByteStore`] backed by [`moka::future::Cache`].
///
/// Cheap to clone: it wraps the cache in an `Arc`, so every clone shares the
/// same underlying entries.
#[derive(Clone)]
pub struct MokaByteStore {
    cache: Arc<moka::future::Cache<String, Entry>>,
}

impl MokaByteStore {
    /// Builds a store with the given maximum entry count.
    pub fn new(max_capacity: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache: Arc::new(cache) }
    }
}

impl ByteStore for MokaByteStore {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        self.cache.insert(key.to_owned(), Entry { value, ttl }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves() {
        let store = MokaByteStore::new(100);
        store.set("k", Bytes::from_static(b"v"), Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MokaByteStore::new(100);
        assert_eq!(store.get("missing").await, None);
    }
}
