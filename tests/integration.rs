//! End-to-end exercises of `CacheLayer`/`CacheService` against the concrete
//! scenarios enumerated in this crate's specification's testable-properties
//! section, driven with `tower::ServiceExt::oneshot` the way
//! `http-cache-tower`'s own test suite drives its layer.

use {
    bytes::Bytes,
    http::{HeaderValue, Request, Response, StatusCode, header},
    http_body_util::{BodyExt, Full},
    std::{
        collections::HashMap,
        convert::Infallible,
        future::Future,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    tower::{Layer, Service, ServiceExt, service_fn},
    tower_response_cache::{
        CacheLayer,
        cache::{
            SystemClock, VaryParams,
            codec::{self, CachedResponse, CachedResponseBody, CachedVaryRules, Entry},
            store::ByteStore,
        },
    },
};

/// An in-memory [`ByteStore`] that counts `get`/`set` calls overall and per
/// key, and remembers the TTL passed to the most recent `set` for each key.
#[derive(Clone, Default)]
struct CountingStore {
    entries: Arc<Mutex<HashMap<String, (Bytes, Duration)>>>,
    set_counts: Arc<Mutex<HashMap<String, usize>>>,
    gets: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
}

impl CountingStore {
    fn seed(&self, key: &str, entry: &Entry) {
        let bytes = codec::serialize(Some(entry)).expect("entry serializes");
        self.entries.lock().unwrap().insert(key.to_owned(), (bytes, Duration::ZERO));
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn set_count(&self, key: &str) -> usize {
        *self.set_counts.lock().unwrap().get(key).unwrap_or(&0)
    }

    fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    fn get_entry(&self, key: &str) -> Option<Entry> {
        let bytes = self.entries.lock().unwrap().get(key).map(|(bytes, _)| bytes.clone())?;
        codec::deserialize(Some(&bytes[..]))
    }
}

impl ByteStore for CountingStore {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().get(key).map(|(bytes, _)| bytes.clone())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        *self.set_counts.lock().unwrap().entry(key.to_owned()).or_insert(0) += 1;
        self.entries.lock().unwrap().insert(key.to_owned(), (value, ttl));
    }
}

/// A clock fixed to one instant, so response `Age` and entry creation times
/// are deterministic in tests.
struct FixedClock(SystemTime);

impl SystemClock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

fn epoch_plus(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

fn get(path: &str) -> Request<Full<Bytes>> {
    Request::builder().method("GET").uri(path).body(Full::new(Bytes::new())).unwrap()
}

/// A `tower::Service` returning a fixed response, cheap to clone (the
/// `CacheService` clones its inner service on every call per Tower's
/// cloning caveat).
fn fixed(response: Response<Full<Bytes>>) -> impl Service<
    Request<Full<Bytes>>,
    Response = Response<Full<Bytes>>,
    Error = Infallible,
    Future = impl Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send,
> + Clone {
    service_fn(move |_request: Request<Full<Bytes>>| {
        let response = response.clone();
        async move { Ok(response) }
    })
}

fn panics_if_called() -> impl Service<
    Request<Full<Bytes>>,
    Response = Response<Full<Bytes>>,
    Error = Infallible,
    Future = impl Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send,
> + Clone {
    service_fn(|_request: Request<Full<Bytes>>| async move {
        panic!("inner service must not be called when the cache serves the request")
    })
}

// 1. only-if-cached miss -> 504, inner service never called.
#[tokio::test]
async fn only_if_cached_miss_is_gateway_timeout() {
    let store = CountingStore::default();
    let mut service = CacheLayer::new(store).layer(panics_if_called());

    let request = Request::builder()
        .method("GET")
        .uri("/x")
        .header(header::CACHE_CONTROL, "only-if-cached")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = service.ready().await.unwrap().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

// 2. Base-key hit, empty body, Age: 0.
#[tokio::test]
async fn base_key_hit_serves_with_zero_age() {
    let store = CountingStore::default();
    let now = epoch_plus(1_000_000);
    store.seed(
        "GET\u{1f}/x",
        &Entry::Response(CachedResponse {
            body_key_prefix: "unused".into(),
            created_utc_ticks: codec::ticks_from_system_time(now),
            status_code: 200,
            headers: vec![],
            body: Some(Bytes::new()),
        }),
    );

    let mut service =
        CacheLayer::new(store).clock(FixedClock(now)).layer(panics_if_called());

    let response = service.ready().await.unwrap().call(get("/x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::AGE), Some(&HeaderValue::from_static("0")));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

// 3. Vary indirection: a rules entry at the base key redirects to a response
// entry at the derived vary key.
#[tokio::test]
async fn vary_indirection_serves_the_matching_variant() {
    let store = CountingStore::default();
    store.seed(
        "GET\u{1f}/x",
        &Entry::VaryRules(CachedVaryRules {
            vary_key_prefix: "v1".into(),
            headers: vec!["ACCEPT".into()],
            params: vec![],
        }),
    );
    store.seed(
        "GET\u{1f}/xv1ACCEPT=TEXT/HTML",
        &Entry::Response(CachedResponse {
            body_key_prefix: "unused".into(),
            created_utc_ticks: 0,
            status_code: 200,
            headers: vec![],
            body: Some(Bytes::new()),
        }),
    );

    let mut service =
        CacheLayer::new(store.clone()).clock(FixedClock(epoch_plus(0))).layer(panics_if_called());

    let request = Request::builder()
        .method("GET")
        .uri("/x")
        .header(header::ACCEPT, "text/html")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = service.ready().await.unwrap().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // This provider probes exactly one canonical vary key per discovered rules
    // entry (no case-variant fan-out), so the lookup costs exactly two `Get`s:
    // the base key, then the single derived vary key.
    assert_eq!(store.gets(), 2);
}

// 4. Conditional request satisfied by a strong ETag match -> 304, no body.
#[tokio::test]
async fn matching_etag_serves_not_modified() {
    let store = CountingStore::default();
    store.seed(
        "GET\u{1f}/x",
        &Entry::Response(CachedResponse {
            body_key_prefix: "unused".into(),
            created_utc_ticks: 0,
            status_code: 200,
            headers: vec![("etag".into(), "\"E1\"".into())],
            body: Some(Bytes::from_static(b"hello")),
        }),
    );

    let mut service =
        CacheLayer::new(store).clock(FixedClock(epoch_plus(0))).layer(panics_if_called());

    let request = Request::builder()
        .method("GET")
        .uri("/x")
        .header(header::IF_NONE_MATCH, "\"E1\"")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = service.ready().await.unwrap().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

// 5. An upstream response with no freshness directives of its own is stored
// with the default 10-second TTL.
#[tokio::test]
async fn default_validity_is_ten_seconds() {
    let store = CountingStore::default();
    let upstream =
        Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from_static(b"hi"))).unwrap();

    let mut service = CacheLayer::new(store.clone()).layer(fixed(upstream));

    let response = service.ready().await.unwrap().call(get("/x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(store.ttl_of("GET\u{1f}/x"), Some(Duration::from_secs(10)));
}

// 6. Split storage at the minimum-split-body-size boundary.
#[tokio::test]
async fn split_storage_boundary() {
    // `maximum_cached_body_size` is raised well above 70 KiB so these bodies
    // are never discarded for exceeding the *buffering* cap; only the
    // *split* threshold (left at its 70 KiB - 1 default) is under test here.
    async fn store_and_count(body_len: usize, minimum_split_body_size: Option<usize>) -> usize {
        let store = CountingStore::default();
        let body = Bytes::from(vec![b'a'; body_len]);
        let upstream = Response::builder().status(StatusCode::OK).body(Full::new(body)).unwrap();

        let mut layer = CacheLayer::new(store.clone()).maximum_cached_body_size(1024 * 1024);
        if let Some(minimum) = minimum_split_body_size {
            layer = layer.minimum_split_body_size(minimum);
        }

        let mut service = layer.layer(fixed(upstream));
        let response = service.ready().await.unwrap().call(get("/x")).await.unwrap();
        response.into_body().collect().await.unwrap().to_bytes();
        store.sets()
    }

    assert_eq!(store_and_count(70 * 1024, None).await, 2, "exactly at the default splits");
    assert_eq!(store_and_count(70 * 1024 - 1, None).await, 1, "one below the default colocates");
    assert_eq!(store_and_count(1024, Some(2048)).await, 1, "under a custom threshold colocates");
}

// 7. A declared Content-Length that does not match the buffered length
// suppresses storage entirely; the client still gets the real bytes.
#[tokio::test]
async fn content_length_mismatch_suppresses_store() {
    let store = CountingStore::default();
    let upstream = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, "9")
        .body(Full::new(Bytes::from_static(b"0123456789")))
        .unwrap();

    let mut service = CacheLayer::new(store.clone()).layer(fixed(upstream));

    let response = service.ready().await.unwrap().call(get("/x")).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"0123456789"));
    assert_eq!(store.sets(), 0);
}

// 8. The upstream response's Vary/VaryParams signature no longer matches the
// preloaded rules: the rules entry is rewritten exactly once, under a new
// prefix.
#[tokio::test]
async fn vary_rules_rewritten_on_change() {
    let store = CountingStore::default();
    store.seed(
        "GET\u{1f}/x",
        &Entry::VaryRules(CachedVaryRules {
            vary_key_prefix: "old-prefix".into(),
            headers: vec!["HEADERA".into(), "HEADERB".into()],
            params: vec!["PARAMA".into(), "PARAMB".into()],
        }),
    );

    let mut upstream = Response::builder()
        .status(StatusCode::OK)
        .header(header::VARY, "headerA, HEADERB, HEADERc")
        .body(Full::new(Bytes::new()))
        .unwrap();
    upstream.extensions_mut().insert(VaryParams(vec!["paramB".into(), "PARAMAA".into()]));

    let mut service = CacheLayer::new(store.clone()).layer(fixed(upstream));

    let response = service.ready().await.unwrap().call(get("/x")).await.unwrap();
    response.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(store.set_count("GET\u{1f}/x"), 1);
    match store.get_entry("GET\u{1f}/x") {
        Some(Entry::VaryRules(rules)) => assert_ne!(rules.vary_key_prefix, "old-prefix"),
        other => panic!("expected a rewritten vary-rules entry, got {other:?}"),
    }
}

// 9. The upstream response's Vary/VaryParams signature matches the preloaded
// rules once normalized: the existing rules entry is reused untouched.
#[tokio::test]
async fn vary_rules_reused_when_equivalent() {
    let store = CountingStore::default();
    store.seed(
        "GET\u{1f}/x",
        &Entry::VaryRules(CachedVaryRules {
            vary_key_prefix: "old-prefix".into(),
            headers: vec!["HEADERA".into(), "HEADERB".into()],
            params: vec!["PARAMA".into(), "PARAMB".into()],
        }),
    );

    let mut upstream = Response::builder()
        .status(StatusCode::OK)
        .header(header::VARY, "headerA, HEADERB")
        .body(Full::new(Bytes::new()))
        .unwrap();
    upstream.extensions_mut().insert(VaryParams(vec!["paramB".into(), "PARAMA".into()]));

    let mut service = CacheLayer::new(store.clone()).layer(fixed(upstream));

    let response = service.ready().await.unwrap().call(get("/x")).await.unwrap();
    response.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(store.set_count("GET\u{1f}/x"), 0);
    match store.get_entry("GET\u{1f}/x") {
        Some(Entry::VaryRules(rules)) => assert_eq!(rules.vary_key_prefix, "old-prefix"),
        other => panic!("expected the original vary-rules entry to survive, got {other:?}"),
    }
}
