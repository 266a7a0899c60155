use super::{cache::*, service::*};

use {std::sync::Arc, std::time::Duration, tower::Layer};

//
// CacheLayer
//

/// Builder-style configuration for [`CacheService`].
///
/// Construct one with [`new`](Self::new), adjust it with the builder methods
/// below, then call [`Layer::layer`] (or hand it to `ServiceBuilder::layer`)
/// to wrap an inner service.
///
/// A store is mandatory: a `CacheLayer` with no store to read and write
/// would have nothing to do.
pub struct CacheLayer<StoreT, KeyProviderT = DefaultKeyProvider> {
    store: StoreT,
    key_provider: KeyProviderT,
    configuration: CacheConfiguration,
}

impl<StoreT> CacheLayer<StoreT, DefaultKeyProvider>
where
    StoreT: ByteStore,
{
    /// Wraps `store` with the default configuration and [`DefaultKeyProvider`].
    pub fn new(store: StoreT) -> Self {
        Self { store, key_provider: DefaultKeyProvider, configuration: CacheConfiguration::default() }
    }
}

impl<StoreT, KeyProviderT> CacheLayer<StoreT, KeyProviderT>
where
    StoreT: ByteStore,
{
    /// Replaces the key provider, e.g. to vary cache keys by tenant or to
    /// canonicalize paths before they reach [`DefaultKeyProvider`]'s scheme.
    pub fn key_provider<NewKeyProviderT>(
        self,
        key_provider: NewKeyProviderT,
    ) -> CacheLayer<StoreT, NewKeyProviderT>
    where
        NewKeyProviderT: KeyProvider,
    {
        CacheLayer { store: self.store, key_provider, configuration: self.configuration }
    }

    /// Buffering cap, in bytes, per response. Responses whose body exceeds
    /// this are forwarded normally but never cached.
    ///
    /// The default is 64 KiB.
    pub fn maximum_cached_body_size(mut self, maximum_cached_body_size: usize) -> Self {
        self.configuration.maximum_cached_body_size = maximum_cached_body_size;
        self
    }

    /// Threshold, in bytes, at which a response body is stored in its own
    /// entry rather than colocated with the response metadata.
    ///
    /// The default is 70 KiB minus one byte.
    pub fn minimum_split_body_size(mut self, minimum_split_body_size: usize) -> Self {
        self.configuration.minimum_split_body_size = minimum_split_body_size;
        self
    }

    /// Freshness lifetime assumed for a response that computes none of its
    /// own (`s-maxage`, `max-age`, `Expires`).
    ///
    /// The default is 10 seconds.
    pub fn default_expiration(mut self, default_expiration: Duration) -> Self {
        self.configuration.default_expiration = default_expiration;
        self
    }

    /// Overrides the clock used to compute response ages and entry
    /// creation times. Intended for tests; production code should leave this
    /// at [`RealClock`], the default.
    pub fn clock(mut self, clock: impl SystemClock + 'static) -> Self {
        self.configuration.clock = Arc::new(clock);
        self
    }
}

impl<StoreT, KeyProviderT> Clone for CacheLayer<StoreT, KeyProviderT>
where
    StoreT: ByteStore,
    KeyProviderT: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key_provider: self.key_provider.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

impl<InnerServiceT, StoreT, KeyProviderT> Layer<InnerServiceT> for CacheLayer<StoreT, KeyProviderT>
where
    StoreT: ByteStore,
    KeyProviderT: KeyProvider + Clone,
{
    type Service = CacheService<InnerServiceT, StoreT, KeyProviderT>;

    fn layer(&self, inner_service: InnerServiceT) -> Self::Service {
        CacheService::new(
            inner_service,
            self.store.clone(),
            self.key_provider.clone(),
            self.configuration.clone(),
        )
    }
}
