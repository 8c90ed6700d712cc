//! Per-invocation request context.
//!
//! Captures the inbound HTTP headers of one request and travels with the
//! tool invocation that request triggers. Each invocation gets its own
//! context; nothing here is reachable from another request.

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::debug;

/// Headers and identifiers of a single in-flight request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Header name/value pairs in arrival order.
    headers: Vec<(String, String)>,
    session_id: Option<String>,
    request_id: Option<Value>,
}

impl RequestContext {
    /// Capture the headers of an inbound request.
    ///
    /// Values that are not valid visible ASCII are kept lossily decoded.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect::<Vec<_>>();
        debug!("MCP: Captured {} request headers", headers.len());
        Self {
            headers,
            ..Default::default()
        }
    }

    /// Build a context from explicit header pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Value) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Case-insensitive header lookup; the first matching header wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&Value> {
        self.request_id.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let ctx = RequestContext::from_pairs([("X-Forwarded-User", "alice")]);
        assert_eq!(ctx.header("x-forwarded-user"), Some("alice"));
        assert_eq!(ctx.header("X-FORWARDED-USER"), Some("alice"));
        assert_eq!(ctx.header("x-other"), None);
    }

    #[test]
    fn test_from_header_map() {
        let mut map = HeaderMap::new();
        map.insert("x-forwarded-user", HeaderValue::from_static("bob"));
        map.insert("accept", HeaderValue::from_static("application/json"));
        let ctx = RequestContext::from_headers(&map).with_session("s1");

        assert_eq!(ctx.header("X-Forwarded-User"), Some("bob"));
        assert_eq!(ctx.headers().count(), 2);
        assert_eq!(ctx.session_id(), Some("s1"));
        assert!(!ctx.is_empty());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = RequestContext::from_pairs([("x-forwarded-user", "alice")]);
        let b = RequestContext::from_pairs([("x-forwarded-user", "bob")]);
        assert_eq!(a.header("x-forwarded-user"), Some("alice"));
        assert_eq!(b.header("x-forwarded-user"), Some("bob"));
    }
}
