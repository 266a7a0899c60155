use {
    ::axum::{Router, routing::get},
    tokio::net::TcpListener,
    tower_http::trace::TraceLayer,
    tower_response_cache::{CacheLayer, cache::store::moka::MokaByteStore},
    tracing_subscriber::EnvFilter,
};

// Axum server fronted by this crate's caching layer.
//
// Pay attention to the tracing log to see what the middleware and the cache are doing!
// (Entries expire after 10 seconds, the default freshness lifetime.)
//
// You can send requests from a web browser or via CLI. Some fun examples:
//
//   curl http://localhost:8080
//
//   curl --verbose http://localhost:8080
//
//   curl http://localhost:8080?x=1&y=2
//   curl http://localhost:8080?y=2&x=1

// Not a promise for actual maximum memory use: it bounds the number of entries.
const CACHE_SIZE: u64 = 10_000;

const MAX_BODY_SIZE: usize = 1024; // 1 KiB

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let store = MokaByteStore::new(CACHE_SIZE);

    let router = Router::new()
        .route("/", get(("Hello, world!\n",)))
        .layer(CacheLayer::new(store).maximum_cached_body_size(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind("[::]:8080").await.expect("TcpListener::bind");
    // If IPv6 is disabled on your machine (for shame!):
    // let listener = TcpListener::bind("0.0.0.0:8080").await.expect("bind");
    tracing::info!("bound to: {:?}", listener.local_addr());
    ::axum::serve(listener, router).await.expect("axum::serve");
}
