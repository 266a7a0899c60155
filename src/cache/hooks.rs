//! The host feature slot for application-declared vary parameters.

/// Query parameter names, beyond the response's `Vary` header, that the
/// handler declares this response varies by.
///
/// This is the feature-slot side channel from the specification: handlers
/// that want a response keyed by a query parameter without advertising it in
/// `Vary` (because it is not itself an HTTP header) insert this into the
/// response's [`Extensions`](http::Extensions):
///
/// ```ignore
/// response.extensions_mut().insert(VaryParams(vec!["page".into()]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct VaryParams(pub Vec<String>);
