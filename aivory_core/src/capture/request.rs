/**
 * Request-context gathering.
 *
 * When the process is serving a request, captures carry the request's
 * metadata (method, path, host, user agent, remote address, request id)
 * and sanitized views of the query, form body, and session.
 *
 * The agent itself has no web framework; it reads the CGI-style
 * variables a fronting server exports. Hosts that embed a framework can
 * install their own `RequestSource` at init and feed real per-request
 * state instead.
 */
use std::env;

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// RequestSnapshot
// ---------------------------------------------------------------------------

/// Everything the probe knows about the in-flight request.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    /// Request metadata: `method`, `path`, `host`, `user_agent`,
    /// `remote_addr`, `request_id` (absent keys are omitted).
    pub meta: Map<String, Value>,

    /// Query-string parameters, if known.
    pub query: Option<Map<String, Value>>,

    /// Form-body parameters, if known.
    pub form: Option<Map<String, Value>>,

    /// Session state, if known.
    pub session: Option<Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// RequestSource
// ---------------------------------------------------------------------------

/// Supplies the current request, or `None` when the process is not
/// serving one.
pub trait RequestSource: Send + Sync {
    fn snapshot(&self) -> Option<RequestSnapshot>;
}

/**
 * Default source reading the CGI-style environment a fronting server
 * exports: `REQUEST_METHOD`, `REQUEST_URI`, `HTTP_HOST`,
 * `HTTP_USER_AGENT`, `REMOTE_ADDR`, `HTTP_X_REQUEST_ID`, `QUERY_STRING`.
 *
 * `REQUEST_METHOD` is the liveness signal: without it the process is
 * not serving a request and `snapshot()` returns `None`.
 */
pub struct EnvRequestSource;

impl RequestSource for EnvRequestSource {
    fn snapshot(&self) -> Option<RequestSnapshot> {
        let method = env::var("REQUEST_METHOD").ok().filter(|v| !v.is_empty())?;

        let mut meta = Map::new();
        meta.insert("method".into(), Value::String(method));

        for (var, key) in [
            ("REQUEST_URI", "path"),
            ("HTTP_HOST", "host"),
            ("HTTP_USER_AGENT", "user_agent"),
            ("REMOTE_ADDR", "remote_addr"),
            ("HTTP_X_REQUEST_ID", "request_id"),
        ] {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    meta.insert(key.into(), Value::String(value));
                }
            }
        }

        let query = env::var("QUERY_STRING")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|qs| parse_query(&qs));

        Some(RequestSnapshot {
            meta,
            query,
            form: None,
            session: None,
        })
    }
}

/**
 * Splits `a=1&b=two` into a string mapping. Keys without `=` map to the
 * empty string; repeated keys keep the last value.
 */
pub fn parse_query(qs: &str) -> Map<String, Value> {
    let mut map = Map::new();

    for pair in qs.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => map.insert(key.to_string(), Value::String(value.to_string())),
            None => map.insert(pair.to_string(), Value::String(String::new())),
        };
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_pairs() {
        let map = parse_query("a=1&b=two&flag");
        assert_eq!(map["a"], "1");
        assert_eq!(map["b"], "two");
        assert_eq!(map["flag"], "");
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query("").is_empty());
    }
}
