use crate::cache::{
    body::{BufferingBody, CacheBody, FinalizeBuilder},
    codec::{
        CachedResponse, CachedResponseBody, CachedVaryRules, Entry, system_time_from_ticks,
        ticks_from_system_time,
    },
    configuration::CacheConfiguration,
    context::RequestContext,
    headers as cache_headers, policy,
    key::{DefaultKeyProvider, KeyProvider},
    store::{ByteStore, TypedStore},
};

use {
    bytes::Bytes,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, header},
    http_body::Body,
    kutil::std::{error::*, future::*},
    std::{mem, task::*},
    tower::Service,
};

/// HTTP response caching service.
///
/// You will usually reach this through [`CacheLayer`](crate::CacheLayer)
/// rather than constructing it directly.
pub struct CacheService<InnerServiceT, StoreT, KeyProviderT = DefaultKeyProvider> {
    inner_service: InnerServiceT,
    store: TypedStore<StoreT>,
    key_provider: KeyProviderT,
    configuration: CacheConfiguration,
}

impl<InnerServiceT, StoreT, KeyProviderT> CacheService<InnerServiceT, StoreT, KeyProviderT> {
    pub fn new(
        inner_service: InnerServiceT,
        store: StoreT,
        key_provider: KeyProviderT,
        configuration: CacheConfiguration,
    ) -> Self
    where
        StoreT: ByteStore,
    {
        Self { inner_service, store: TypedStore::new(store), key_provider, configuration }
    }

    // Clone while keeping `inner_service`.
    //
    // See: https://docs.rs/tower/latest/tower/trait.Service.html#be-careful-when-cloning-inner-services
    fn clone_and_keep_inner_service(&mut self) -> Self
    where
        InnerServiceT: Clone,
        StoreT: ByteStore,
        KeyProviderT: Clone,
    {
        let mut clone = self.clone();
        clone.inner_service = mem::replace(&mut self.inner_service, clone.inner_service);
        clone
    }

    async fn handle<RequestBodyT, ResponseBodyT>(
        mut self,
        request: Request<RequestBodyT>,
    ) -> Result<Response<CacheBody<ResponseBodyT>>, InnerServiceT::Error>
    where
        InnerServiceT: Service<Request<RequestBodyT>, Response = Response<ResponseBodyT>>,
        ResponseBodyT: 'static + Body<Data = Bytes> + Send,
        StoreT: ByteStore,
        KeyProviderT: KeyProvider,
    {
        let method = request.method().clone();
        let uri = request.uri().clone();

        if !policy::is_request_cacheable(&method, request.headers()) {
            tracing::debug!("skip (request not cacheable)");
            let response = self.inner_service.call(request).await?;
            return Ok(response.map(CacheBody::passthrough));
        }

        let request_headers = request.headers().clone();
        let mut context = RequestContext::new();

        if let Some(served) = self
            .try_serve_from_cache::<ResponseBodyT>(&method, &uri, &request_headers, &mut context)
            .await
        {
            return Ok(served);
        }

        let upstream_response = self.inner_service.call(request).await?;
        let (mut parts, body) = upstream_response.into_parts();

        if !policy::is_response_cacheable(parts.status, &parts.headers) {
            tracing::debug!("skip (response not cacheable)");
            return Ok(Response::from_parts(parts, CacheBody::passthrough(body)));
        }

        tracing::debug!("miss");

        let response_time = self.configuration.clock().now();
        let default_expiration = self.configuration.default_expiration();
        let valid_for = policy::freshness_lifetime(&parts.headers, response_time, default_expiration);

        if !parts.headers.contains_key(header::DATE) {
            if let Ok(value) = HeaderValue::from_str(&cache_headers::format_http_date(response_time)) {
                parts.headers.insert(header::DATE, value);
            }
        }
        let created =
            parts.headers.get(header::DATE).and_then(cache_headers::parse_http_date).unwrap_or(response_time);

        let normalized_vary_headers = cache_headers::normalize_list(
            parts.headers.get_all(header::VARY).iter().filter_map(|value| value.to_str().ok()),
        );
        let vary_params = parts
            .extensions
            .get::<crate::cache::hooks::VaryParams>()
            .map(|params| params.0.clone())
            .unwrap_or_default();
        let normalized_vary_params =
            cache_headers::normalize_list(vary_params.iter().map(String::as_str));

        let base_key = self.key_provider.storage_base_key(&method, &uri);

        let vary_rules = if normalized_vary_headers.is_empty() && normalized_vary_params.is_empty() {
            None
        } else {
            match &context.cached_vary_rules {
                Some(existing)
                    if existing.headers == normalized_vary_headers
                        && existing.params == normalized_vary_params =>
                {
                    Some(existing.clone())
                }
                _ => {
                    let fresh = CachedVaryRules {
                        vary_key_prefix: new_opaque_id(),
                        headers: normalized_vary_headers,
                        params: normalized_vary_params,
                    };
                    self.store.set(&base_key, &Entry::VaryRules(fresh.clone()), valid_for).await;
                    Some(fresh)
                }
            }
        };

        let storage_key = match &vary_rules {
            Some(rules) => self.key_provider.storage_vary_key(&base_key, rules, &request_headers, &uri),
            None => base_key.clone(),
        };

        let body_key_prefix = new_opaque_id();
        let response_head = CachedResponse {
            body_key_prefix: body_key_prefix.clone(),
            created_utc_ticks: ticks_from_system_time(created),
            status_code: parts.status.as_u16(),
            headers: headers_to_pairs(&parts.headers),
            body: None,
        };

        let declared_content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let minimum_split_body_size = self.configuration.minimum_split_body_size();
        let store = self.store.clone();

        let finalize: FinalizeBuilder = Box::new(move |buffered: Bytes| {
            Box::pin(async move {
                if let Some(declared) = declared_content_length {
                    if declared != buffered.len() as u64 {
                        tracing::debug!("skip store (content-length mismatch): {}", storage_key);
                        return;
                    }
                }

                if buffered.len() > minimum_split_body_size {
                    store.set(&storage_key, &Entry::Response(response_head.clone()), valid_for).await;
                    store
                        .set(
                            &body_key_prefix,
                            &Entry::Body(CachedResponseBody { body: buffered }),
                            valid_for,
                        )
                        .await;
                    tracing::debug!("store (split body): {}", storage_key);
                } else {
                    let mut head = response_head;
                    head.body = Some(buffered);
                    store.set(&storage_key, &Entry::Response(head), valid_for).await;
                    tracing::debug!("store (colocated body): {}", storage_key);
                }
            })
        });

        let maximum_cached_body_size = self.configuration.maximum_cached_body_size();
        let buffering_body = BufferingBody::new(body, maximum_cached_body_size, Some(finalize));

        Ok(Response::from_parts(parts, CacheBody::buffering(buffering_body)))
    }

    /// Probes the store for a usable entry. Returns `Some` (a `200`-range
    /// response, a conditional `304`, or an `only-if-cached` `504`) when this
    /// request should be answered without touching the inner service.
    async fn try_serve_from_cache<ResponseBodyT>(
        &self,
        method: &Method,
        uri: &Uri,
        request_headers: &HeaderMap,
        context: &mut RequestContext,
    ) -> Option<Response<CacheBody<ResponseBodyT>>>
    where
        StoreT: ByteStore,
        KeyProviderT: KeyProvider,
    {
        for base_key in self.key_provider.lookup_base_keys(method, uri) {
            let candidate = match self.store.get(&base_key).await {
                Some(Entry::Response(response)) => Some((response, base_key.clone())),

                Some(Entry::VaryRules(rules)) => {
                    context.cached_vary_rules = Some(rules.clone());

                    let mut found = None;
                    for vary_key in
                        self.key_provider.lookup_vary_keys(&base_key, &rules, request_headers, uri)
                    {
                        if let Some(Entry::Response(response)) = self.store.get(&vary_key).await {
                            found = Some((response, vary_key));
                            break;
                        }
                    }
                    found
                }

                Some(Entry::Body(_)) | None => None,
            };

            if let Some((response, storage_key)) = candidate {
                return match self.serve_candidate(response, &storage_key, request_headers, context).await
                {
                    ServeOutcome::Served(response) => Some(response),
                    ServeOutcome::NotFresh | ServeOutcome::BodyMissing => {
                        self.only_if_cached_or_miss(request_headers)
                    }
                };
            }
        }

        self.only_if_cached_or_miss(request_headers)
    }

    fn only_if_cached_or_miss<ResponseBodyT>(
        &self,
        request_headers: &HeaderMap,
    ) -> Option<Response<CacheBody<ResponseBodyT>>> {
        if policy::is_only_if_cached(request_headers) {
            tracing::debug!("only-if-cached miss");
            let response = Response::builder()
                .status(StatusCode::GATEWAY_TIMEOUT)
                .body(CacheBody::cached(Bytes::new()))
                .expect("valid response");
            return Some(response);
        }
        None
    }

    async fn serve_candidate<ResponseBodyT>(
        &self,
        candidate: CachedResponse,
        storage_key: &str,
        request_headers: &HeaderMap,
        context: &mut RequestContext,
    ) -> ServeOutcome<ResponseBodyT>
    where
        StoreT: ByteStore,
    {
        let response_time = self.configuration.clock().now();
        context.response_time = Some(response_time);

        let created = system_time_from_ticks(candidate.created_utc_ticks);
        let age = response_time.duration_since(created).unwrap_or_default();
        context.cached_entry_age = Some(age);

        let cached_headers = pairs_to_headers(&candidate.headers);
        let must_revalidate =
            cache_headers::CacheControl::parse(&cached_headers).has("must-revalidate");
        let default_expiration = self.configuration.default_expiration();
        let valid_for = policy::freshness_lifetime(&cached_headers, created, default_expiration);

        if !policy::is_cached_entry_fresh(valid_for, age, must_revalidate, request_headers) {
            tracing::debug!("stale, treating as miss: {}", storage_key);
            return ServeOutcome::NotFresh;
        }

        if policy::conditional_request_satisfied(request_headers, &cached_headers) {
            tracing::debug!("hit (not modified): {}", storage_key);
            let response = Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(CacheBody::cached(Bytes::new()))
                .expect("valid response");
            return ServeOutcome::Served(response);
        }

        let body = match &candidate.body {
            Some(body) => body.clone(),
            None => match self.store.get(&candidate.body_key_prefix).await {
                Some(Entry::Body(body)) => body.body,
                _ => {
                    tracing::debug!("split body entry missing, treating as miss: {}", storage_key);
                    return ServeOutcome::BodyMissing;
                }
            },
        };

        tracing::debug!("hit: {}", storage_key);

        let mut headers = cached_headers;
        headers.remove(header::AGE);
        if let Ok(value) = HeaderValue::from_str(&age.as_secs().to_string()) {
            headers.insert(header::AGE, value);
        }
        if !headers.contains_key(header::CONTENT_LENGTH) && !headers.contains_key(header::TRANSFER_ENCODING) {
            if let Ok(value) = HeaderValue::from_str(&body.len().to_string()) {
                headers.insert(header::CONTENT_LENGTH, value);
            }
        }

        let mut builder = Response::builder().status(
            StatusCode::from_u16(candidate.status_code).unwrap_or(StatusCode::OK),
        );
        *builder.headers_mut().expect("builder has headers") = headers;

        let response = builder.body(CacheBody::cached(body)).expect("valid response");
        ServeOutcome::Served(response)
    }
}

enum ServeOutcome<ResponseBodyT> {
    Served(Response<CacheBody<ResponseBodyT>>),
    NotFresh,
    BodyMissing,
}

fn new_opaque_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Copies a header map into ordered pairs for storage, excluding `Age`
/// (synthesized fresh on every serve, never persisted).
fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| *name != header::AGE)
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned())))
        .collect()
}

/// The inverse of [`headers_to_pairs`], additionally dropping hop-by-hop
/// headers even if one was somehow persisted.
fn pairs_to_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if cache_headers::HOP_BY_HOP_HEADERS.iter().any(|hop| name.eq_ignore_ascii_case(hop)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => headers.append(name, value),
            _ => {
                tracing::error!("dropping malformed stored header: {}", name);
                continue;
            }
        };
    }
    headers
}

impl<InnerServiceT, StoreT, KeyProviderT> Clone for CacheService<InnerServiceT, StoreT, KeyProviderT>
where
    InnerServiceT: Clone,
    StoreT: ByteStore,
    KeyProviderT: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner_service: self.inner_service.clone(),
            store: self.store.clone(),
            key_provider: self.key_provider.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

impl<InnerServiceT, RequestBodyT, ResponseBodyT, ErrorT, StoreT, KeyProviderT>
    Service<Request<RequestBodyT>> for CacheService<InnerServiceT, StoreT, KeyProviderT>
where
    InnerServiceT: 'static
        + Service<Request<RequestBodyT>, Response = Response<ResponseBodyT>, Error = ErrorT>
        + Clone
        + Send,
    InnerServiceT::Future: Send,
    RequestBodyT: 'static + Send,
    ResponseBodyT: 'static + Body<Data = Bytes> + Send,
    StoreT: ByteStore,
    KeyProviderT: 'static + KeyProvider + Clone + Send,
{
    type Response = Response<CacheBody<ResponseBodyT>>;
    type Error = ErrorT;
    type Future = CapturedFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, context: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.inner_service.poll_ready(context)
    }

    fn call(&mut self, request: Request<RequestBodyT>) -> Self::Future {
        // See the note on `clone_and_keep_inner_service`: Tower expects services to
        // be cheaply cloneable, but a naive clone here would also clone the inner
        // service's clone, recursively, for every layer below this one.
        let cloned_self = self.clone_and_keep_inner_service();
        capture_async! { cloned_self.handle(request).await }
    }
}
