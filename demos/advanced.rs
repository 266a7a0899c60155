use {
    ::axum::{Router, http::HeaderMap, routing::get},
    std::time::Duration,
    tokio::net::TcpListener,
    tower_http::trace::TraceLayer,
    tower_response_cache::{CacheLayer, cache::store::moka::MokaByteStore},
    tracing_subscriber::EnvFilter,
};

// (See basic.rs first.)
//
// Axum server exercising more of this crate's RFC 7234 surface: `Vary`-keyed
// entries, client-side conditional validation, and `only-if-cached`.
//
// Pay attention to the tracing log to see what the middleware and the cache are doing!
//
//   curl http://localhost:8080
//
//   curl --header 'Accept: text/html' http://localhost:8080/negotiated
//   curl --header 'Accept: application/json' http://localhost:8080/negotiated
//
//   curl http://localhost:8080/toobig
//
//   curl http://localhost:8080/nevercache
//
//   curl --verbose http://localhost:8080/clientcache
//
//   curl --header 'Cache-Control: only-if-cached' http://localhost:8080/nevercache
//
// A browser is easier for testing client-side caching on /clientcache.
// Make sure to open the developer tools with F12: refresh normally with F5 to
// see a 304, or force a reload with CTRL+F5.

const CACHE_SIZE: u64 = 10_000;

// Small on purpose, to demonstrate "/toobig" skipping the cache.
const MAX_BODY_SIZE: usize = 200;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let store = MokaByteStore::new(CACHE_SIZE);

    let router = Router::new()
        .route("/", get(("Hello, world!\n",)))
        .route("/toobig", get(("This response is too big to cache\n".repeat(10),)))
        .route(
            "/clientcache",
            get((
                [("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")],
                "This response might be cached by the client\n",
            )),
        )
        .route(
            "/clientcache2",
            get(([("ETag", r#""stuff""#)], "This response might also be cached by the client\n")),
        )
        .route(
            "/nevercache",
            get(([("Cache-Control", "no-store")], "This response is never cached\n")),
        )
        .route(
            "/quickie",
            get((
                [("Cache-Control", "max-age=1")],
                "This response has a custom one-second freshness lifetime\n",
            )),
        )
        .route(
            "/negotiated",
            get(async |headers: HeaderMap| {
                // `Vary: Accept` tells the middleware to key this response by the
                // request's `Accept` header, so the two variants below land in
                // distinct cache entries instead of shadowing each other.
                let accept = headers.get("accept").and_then(|value| value.to_str().ok()).unwrap_or("");
                if accept.contains("application/json") {
                    ([("Vary", "Accept"), ("Content-Type", "application/json")], r#"{"greeting":"hello"}"#)
                } else {
                    ([("Vary", "Accept"), ("Content-Type", "text/html")], "<p>hello</p>")
                }
            }),
        )
        .layer(
            CacheLayer::new(store)
                .maximum_cached_body_size(MAX_BODY_SIZE)
                .default_expiration(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind("[::]:8080").await.expect("TcpListener::bind");
    // If IPv6 is disabled on your machine (for shame!):
    // let listener = TcpListener::bind("0.0.0.0:8080").await.expect("bind");
    tracing::info!("bound to: {:?}", listener.local_addr());
    ::axum::serve(listener, router).await.expect("axum::serve");
}
