//! Pure predicates over a request/response: cacheability and freshness.
//!
//! Grounded on the RFC 7234 reference logic in `http-cache-semantics`
//! (`CachePolicy::is_storable`, `satisfies_without_revalidation`), adapted to
//! this crate's split request/response context instead of one combined
//! policy object.

use {
    super::headers::{CacheControl, etag_strong_matches, parse_http_date, split_etags},
    http::{HeaderMap, Method, StatusCode, header},
    std::time::Duration,
};

/// Status codes cacheable by default per RFC 7231 §6.1, absent an explicit
/// `Cache-Control` directive saying otherwise.
const DEFAULT_CACHEABLE_STATUS_CODES: &[u16] =
    &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Whether a request may be served from, or contribute to, the cache.
///
/// False for anything but `GET`/`HEAD`, for `Cache-Control: no-cache`/
/// `no-store`, for `Pragma: no-cache`, and when the request carries
/// `Authorization` (a shared-cache restriction).
pub fn is_request_cacheable(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return false;
    }

    let cache_control = CacheControl::parse(headers);
    if cache_control.has("no-cache") || cache_control.has("no-store") {
        return false;
    }

    if headers
        .get_all(header::PRAGMA)
        .iter()
        .any(|value| value.to_str().unwrap_or("").to_ascii_lowercase().contains("no-cache"))
    {
        return false;
    }

    if headers.contains_key(header::AUTHORIZATION) {
        return false;
    }

    true
}

/// Whether the request carries `Cache-Control: only-if-cached`.
pub fn is_only_if_cached(headers: &HeaderMap) -> bool {
    CacheControl::parse(headers).has("only-if-cached")
}

/// Whether a response is eligible to be stored.
///
/// True iff the status is cacheable by default or the response opts in with
/// `public`/`s-maxage`/`max-age`, the response does not opt out with
/// `no-store`/`no-cache`/`private`, it carries no `Set-Cookie`, and a
/// freshness lifetime is computable (always true here: [`freshness_lifetime`]
/// falls back to a default).
pub fn is_response_cacheable(status: StatusCode, headers: &HeaderMap) -> bool {
    let cache_control = CacheControl::parse(headers);

    if cache_control.has("no-store") || cache_control.has("no-cache") || cache_control.has("private")
    {
        return false;
    }

    if headers.contains_key(header::SET_COOKIE) {
        return false;
    }

    // A literal `Vary: *` response can never be correctly matched again, so it
    // is never worth storing (see `freshness_lifetime`, which assigns it a
    // zero lifetime); excluding it here avoids a cache entry that could only
    // ever be stale.
    if vary_is_wildcard(headers) {
        return false;
    }

    let status_cacheable_by_default = DEFAULT_CACHEABLE_STATUS_CODES.contains(&status.as_u16());
    let opts_in = cache_control.has("public")
        || cache_control.value("s-maxage").is_some()
        || cache_control.value("max-age").is_some();

    status_cacheable_by_default || opts_in
}

fn vary_is_wildcard(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::VARY)
        .iter()
        .any(|value| value.to_str().unwrap_or("").trim() == "*")
}

/// The response's freshness lifetime: first present of `s-maxage`, `max-age`,
/// `Expires - response_time`, else `default`.
pub fn freshness_lifetime(headers: &HeaderMap, response_time: std::time::SystemTime, default: Duration) -> Duration {
    if vary_is_wildcard(headers) {
        return Duration::ZERO;
    }

    let cache_control = CacheControl::parse(headers);
    if let Some(seconds) = cache_control.seconds("s-maxage") {
        return seconds;
    }
    if let Some(seconds) = cache_control.seconds("max-age") {
        return seconds;
    }
    if let Some(expires) = headers.get(header::EXPIRES).and_then(parse_http_date) {
        return expires.duration_since(response_time).unwrap_or(Duration::ZERO);
    }

    default
}

/// Whether a cached entry already loaded is still usable for this request,
/// given its remaining lifetime and age, plus request-side freshness
/// directives (`max-age`, `min-fresh`, `max-stale`).
///
/// `must_revalidate` disables the `max-stale` allowance entirely: a response
/// stored with `Cache-Control: must-revalidate` may never be served stale,
/// regardless of what the request is willing to tolerate.
pub fn is_cached_entry_fresh(
    valid_for: Duration,
    age: Duration,
    must_revalidate: bool,
    request_headers: &HeaderMap,
) -> bool {
    let remaining = valid_for.checked_sub(age);
    let is_stale = remaining.is_none();

    let request_cache_control = CacheControl::parse(request_headers);

    if let Some(requested_max_age) = request_cache_control.seconds("max-age") {
        if age >= requested_max_age {
            return false;
        }
    }

    if let Some(min_fresh) = request_cache_control.seconds("min-fresh") {
        match remaining {
            Some(remaining) if remaining >= min_fresh => {}
            _ => return false,
        }
    }

    if !is_stale {
        return true;
    }

    if must_revalidate {
        return false;
    }

    match request_cache_control.value("max-stale") {
        // Bare `max-stale` (no value) tolerates any amount of staleness.
        Some("") | None if request_cache_control.has("max-stale") => true,
        Some(value) => {
            let staleness = age.saturating_sub(valid_for);
            value.parse::<u64>().is_ok_and(|max_stale| staleness <= Duration::from_secs(max_stale))
        }
        None => false,
    }
}

/// Whether a conditional request (`If-None-Match` / `If-Unmodified-Since`)
/// against a cached entry's headers is satisfied, meaning a bare `304` should
/// be served instead of the entry's body.
pub fn conditional_request_satisfied(request_headers: &HeaderMap, cached_headers: &HeaderMap) -> bool {
    if let Some(if_none_match) = request_headers.get(header::IF_NONE_MATCH) {
        let Ok(if_none_match) = if_none_match.to_str() else { return false };
        let requested_tags = split_etags(if_none_match);

        if requested_tags.iter().any(|tag| *tag == "*") {
            return true;
        }

        return match cached_headers.get(header::ETAG).and_then(|value| value.to_str().ok()) {
            Some(cached_tag) => {
                requested_tags.iter().any(|tag| etag_strong_matches(tag, cached_tag))
            }
            None => false,
        };
    }

    if let Some(if_unmodified_since) = request_headers
        .get(header::IF_UNMODIFIED_SINCE)
        .and_then(parse_http_date)
    {
        let reference = cached_headers
            .get(header::LAST_MODIFIED)
            .or_else(|| cached_headers.get(header::DATE))
            .and_then(parse_http_date);

        return matches!(reference, Some(reference) if reference <= if_unmodified_since);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn post_is_not_request_cacheable() {
        assert!(!is_request_cacheable(&Method::POST, &HeaderMap::new()));
    }

    #[test]
    fn authorization_is_not_request_cacheable() {
        let headers = header_map(&[("authorization", "Bearer x")]);
        assert!(!is_request_cacheable(&Method::GET, &headers));
    }

    #[test]
    fn default_status_is_response_cacheable() {
        assert!(is_response_cacheable(StatusCode::OK, &HeaderMap::new()));
    }

    #[test]
    fn set_cookie_is_not_response_cacheable() {
        let headers = header_map(&[("set-cookie", "a=b")]);
        assert!(!is_response_cacheable(StatusCode::OK, &headers));
    }

    #[test]
    fn private_opts_out() {
        let headers = header_map(&[("cache-control", "private")]);
        assert!(!is_response_cacheable(StatusCode::OK, &headers));
    }

    #[test]
    fn not_yet_stale_entry_is_fresh() {
        let fresh = is_cached_entry_fresh(
            Duration::from_secs(10),
            Duration::from_secs(5),
            false,
            &HeaderMap::new(),
        );
        assert!(fresh);
    }

    #[test]
    fn stale_entry_without_max_stale_is_not_fresh() {
        let fresh = is_cached_entry_fresh(
            Duration::from_secs(10),
            Duration::from_secs(20),
            false,
            &HeaderMap::new(),
        );
        assert!(!fresh);
    }

    #[test]
    fn max_stale_tolerates_staleness() {
        let headers = header_map(&[("cache-control", "max-stale=30")]);
        let fresh =
            is_cached_entry_fresh(Duration::from_secs(10), Duration::from_secs(20), false, &headers);
        assert!(fresh);
    }

    #[test]
    fn must_revalidate_overrides_max_stale() {
        let headers = header_map(&[("cache-control", "max-stale=30")]);
        let fresh =
            is_cached_entry_fresh(Duration::from_secs(10), Duration::from_secs(20), true, &headers);
        assert!(!fresh);
    }

    #[test]
    fn wildcard_etag_is_satisfied() {
        let request = header_map(&[("if-none-match", "*")]);
        assert!(conditional_request_satisfied(&request, &HeaderMap::new()));
    }

    #[test]
    fn matching_strong_etag_is_satisfied() {
        let request = header_map(&[("if-none-match", "\"E1\"")]);
        let cached = header_map(&[("etag", "\"E1\"")]);
        assert!(conditional_request_satisfied(&request, &cached));
    }

    #[test]
    fn weak_etag_does_not_satisfy() {
        let request = header_map(&[("if-none-match", "W/\"E1\"")]);
        let cached = header_map(&[("etag", "\"E1\"")]);
        assert!(!conditional_request_satisfied(&request, &cached));
    }
}
