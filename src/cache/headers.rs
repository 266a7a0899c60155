//! Small header-parsing helpers shared by the policy provider and the
//! middleware: `Cache-Control` directive parsing, `Vary` normalization,
//! entity-tag comparison, and HTTP-date parsing/formatting.

use {
    http::{HeaderMap, HeaderValue},
    kutil::std::collections::FastHashMap,
    std::time::{Duration, SystemTime, UNIX_EPOCH},
    time::{OffsetDateTime, format_description::FormatItem, macros::format_description},
};

/// `IMF-fixdate`, the HTTP-date format mandated for generation (RFC 9110
/// §5.6.7) and the only one seen from any server that follows the spec, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`. The literal trailing `GMT` is matched
/// exactly rather than going through a general RFC 2822 parser, since RFC
/// 2822's obsolete named-zone handling is not something to depend on here.
const IMF_FIXDATE: &[FormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// A parsed `Cache-Control` header: directive name (lower-case) to optional
/// value. A directive present without a value (e.g. `no-cache`) maps to
/// `None`.
///
/// A directive repeated with conflicting values is dropped entirely, mirroring
/// the reference parser this is grounded on: an ambiguous directive is treated
/// as if the client said nothing at all about it.
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    directives: FastHashMap<String, Option<String>>,
}

impl CacheControl {
    /// Parses every `Cache-Control` header instance present on `headers`.
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut directives: FastHashMap<String, Option<String>> = FastHashMap::default();
        let mut conflicting = Vec::new();

        for value in headers.get_all(http::header::CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for part in value.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let (name, value) = match part.split_once('=') {
                    Some((name, value)) => {
                        (name.trim().to_ascii_lowercase(), Some(unquote(value.trim())))
                    }
                    None => (part.to_ascii_lowercase(), None),
                };

                match directives.get(&name) {
                    None => {
                        directives.insert(name, value);
                    }
                    Some(existing) if *existing == value => {}
                    Some(_) => conflicting.push(name),
                }
            }
        }

        for name in conflicting {
            directives.remove(&name);
        }

        Self { directives }
    }

    pub fn has(&self, directive: &str) -> bool {
        self.directives.contains_key(directive)
    }

    pub fn value(&self, directive: &str) -> Option<&str> {
        self.directives.get(directive).and_then(|value| value.as_deref())
    }

    /// Parses a directive's value as a non-negative number of seconds.
    /// Negative and unparseable values are treated as absent, matching the
    /// reference parser (a malformed `max-age` is not a freshness lifetime).
    pub fn seconds(&self, directive: &str) -> Option<Duration> {
        self.value(directive)
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|seconds| *seconds >= 0)
            .map(|seconds| Duration::from_secs(seconds as u64))
    }
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_owned()
}

/// Header names stripped when copying a cached response's headers onto a
/// served response, even if they were accidentally persisted. A response
/// header shim between two hops, not a caching decision.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Splits a `Vary` (or application `VaryParams`) header value list on commas,
/// trims, upper-cases, and sorts ordinally. Idempotent and order-independent:
/// `normalize_list(normalize_list(xs)) == normalize_list(xs)` and any
/// permutation of `xs` normalizes to the same result.
///
/// When a single input element already contains no comma, splitting is a
/// no-op fast path; this must (and does) produce byte-identical output to the
/// general path, since both end up trimming and upper-casing the same token.
pub fn normalize_list<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut tokens: Vec<String> = values
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_uppercase())
        .filter(|token| !token.is_empty())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Parses an HTTP-date header (`Date`, `Expires`, `Last-Modified`,
/// `If-Unmodified-Since`) into a [`SystemTime`].
pub fn parse_http_date(value: &HeaderValue) -> Option<SystemTime> {
    let value = value.to_str().ok()?;
    let parsed = OffsetDateTime::parse(value, IMF_FIXDATE).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(parsed.unix_timestamp().max(0) as u64))
}

/// Formats a [`SystemTime`] as an HTTP-date (`IMF-fixdate`) header value.
pub fn format_http_date(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let datetime = OffsetDateTime::from_unix_timestamp(since_epoch.as_secs() as i64)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    datetime.format(IMF_FIXDATE).unwrap_or_default()
}

/// Strong entity-tag comparison: both tags must be non-weak (no `W/` prefix)
/// and byte-identical.
pub fn etag_strong_matches(a: &str, b: &str) -> bool {
    !a.starts_with("W/") && !b.starts_with("W/") && a == b
}

/// Splits an `If-None-Match` header value into its comma-separated entity
/// tags (each still including its surrounding quotes, if any).
pub fn split_etags(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|tag| !tag.is_empty()).collect()
}
