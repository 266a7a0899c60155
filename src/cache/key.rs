//! Cache key derivation: base keys independent of `Vary`, and the secondary
//! vary keys derived from a discovered [`CachedVaryRules`].

use {
    super::codec::CachedVaryRules,
    http::{HeaderMap, Method, Uri},
};

/// Delimiter between the method and path in a base key, and between each
/// `NAME=VALUE` token in a vary key. `0x1f` (unit separator) never appears in
/// an HTTP method, path, header name, or query parameter name.
const DELIMITER: char = '\u{1f}';

/// Produces lookup/storage keys from a request and, for vary keys, a
/// discovered [`CachedVaryRules`].
///
/// Implementations are pure: no I/O, no mutation of their inputs.
pub trait KeyProvider {
    /// Keys to probe for a primary entry, in priority order. The default
    /// implementation yields exactly one key.
    fn lookup_base_keys(&self, method: &Method, uri: &Uri) -> Vec<String> {
        vec![self.storage_base_key(method, uri)]
    }

    /// The single key under which the base entry (vary-rules entry, or the
    /// response itself when no vary applies) is written.
    fn storage_base_key(&self, method: &Method, uri: &Uri) -> String;

    /// Keys to probe given a discovered [`CachedVaryRules`], in priority
    /// order. The default implementation yields exactly one key.
    fn lookup_vary_keys(
        &self,
        base_key: &str,
        rules: &CachedVaryRules,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> Vec<String> {
        vec![self.storage_vary_key(base_key, rules, headers, uri)]
    }

    /// The single key under which the variant response is written.
    fn storage_vary_key(
        &self,
        base_key: &str,
        rules: &CachedVaryRules,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> String;
}

/// `METHOD\x1fABSOLUTE-PATH`-shaped keys: upper-cased method, and the request
/// path plus query exactly as the request presented it (no normalization
/// beyond what [`Uri`] already does).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyProvider;

impl DefaultKeyProvider {
    fn combined_token(name: &str, value: Option<&str>) -> String {
        let canonical = value.map(canonicalize_token).unwrap_or_default();
        format!("{}={}", name, canonical)
    }
}

impl KeyProvider for DefaultKeyProvider {
    fn storage_base_key(&self, method: &Method, uri: &Uri) -> String {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}{}", method.as_str().to_ascii_uppercase(), DELIMITER, path)
    }

    fn storage_vary_key(
        &self,
        base_key: &str,
        rules: &CachedVaryRules,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> String {
        let query_map = parse_query(uri);

        let mut tokens = Vec::with_capacity(rules.headers.len() + rules.params.len());

        for header_name in &rules.headers {
            let combined = combine_header_values(headers, header_name);
            tokens.push(Self::combined_token(header_name, combined.as_deref()));
        }
        for param_name in &rules.params {
            let combined = combine_query_values(&query_map, param_name);
            tokens.push(Self::combined_token(param_name, combined.as_deref()));
        }

        let mut key = String::with_capacity(base_key.len() + rules.vary_key_prefix.len() + 16);
        key.push_str(base_key);
        key.push_str(&rules.vary_key_prefix);
        for (index, token) in tokens.iter().enumerate() {
            if index > 0 {
                key.push(DELIMITER);
            }
            key.push_str(token);
        }
        key
    }
}

/// Combines every instance of `name` present on `headers` into one comma-joined
/// value, or `None` if the header is entirely absent.
fn combine_header_values(headers: &HeaderMap, name: &str) -> Option<String> {
    let mut values = headers.get_all(name).iter().peekable();
    values.peek()?;
    let combined = values
        .map(|value| value.to_str().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(",");
    Some(combined)
}

fn parse_query(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|query| {
            query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let name = parts.next().unwrap_or("");
                    let value = parts.next().unwrap_or("");
                    (name.to_owned(), value.to_owned())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn combine_query_values(query: &[(String, String)], name: &str) -> Option<String> {
    let mut found = false;
    let combined = query
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| {
            found = true;
            value.as_str()
        })
        .collect::<Vec<_>>()
        .join(",");
    found.then_some(combined)
}

/// Case-folds a token to upper case. This is the single canonicalization rule
/// applied to every vary-key component (header values, query-param values, and
/// the normalized `Vary` list itself), and is idempotent.
pub fn canonicalize_token(value: &str) -> String {
    value.to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Uri {
        path.parse().unwrap()
    }

    #[test]
    fn base_key_matches_spec_literal() {
        let provider = DefaultKeyProvider;
        let key = provider.storage_base_key(&Method::GET, &uri("/x"));
        assert_eq!(key, "GET\u{1f}/x");
    }

    #[test]
    fn vary_key_matches_spec_literal() {
        let provider = DefaultKeyProvider;
        let base_key = provider.storage_base_key(&Method::GET, &uri("/x"));
        let rules = CachedVaryRules {
            vary_key_prefix: "v1".into(),
            headers: vec!["ACCEPT".into()],
            params: vec![],
        };
        let mut headers = HeaderMap::new();
        headers.insert(http::header::ACCEPT, "text/html".parse().unwrap());

        let key = provider.storage_vary_key(&base_key, &rules, &headers, &uri("/x"));
        assert_eq!(key, "GET\u{1f}/xv1ACCEPT=TEXT/HTML");
    }

    #[test]
    fn missing_header_contributes_empty_token() {
        let provider = DefaultKeyProvider;
        let base_key = provider.storage_base_key(&Method::GET, &uri("/x"));
        let rules = CachedVaryRules {
            vary_key_prefix: "v1".into(),
            headers: vec!["ACCEPT".into()],
            params: vec![],
        };
        let headers = HeaderMap::new();

        let key = provider.storage_vary_key(&base_key, &rules, &headers, &uri("/x"));
        assert_eq!(key, "GET\u{1f}/xv1ACCEPT=");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonicalize_token("text/html");
        let twice = canonicalize_token(&once);
        assert_eq!(once, twice);
    }
}
