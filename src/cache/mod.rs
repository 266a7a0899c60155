//! Cache internals: key derivation, cacheability/freshness policy, the
//! persisted entry format, the store boundary, the buffering body shim, and
//! per-request context.

pub mod body;
pub mod codec;
pub mod configuration;
pub mod context;
pub mod headers;
pub mod hooks;
pub mod key;
pub mod policy;
pub mod store;

pub use {
    body::{BufferingBody, CacheBody, FinalizeBuilder, FinalizeFuture},
    codec::{CachedResponse, CachedResponseBody, CachedVaryRules, CodecError, Entry},
    configuration::{CacheConfiguration, RealClock, SystemClock},
    hooks::VaryParams,
    key::{DefaultKeyProvider, KeyProvider},
    store::{ByteStore, TypedStore},
};
