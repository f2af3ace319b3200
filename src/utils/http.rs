//! HTTP utility functions

use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, RETRY_AFTER};
use hyper::{Body, HeaderMap, Response, StatusCode};
use serde_json::json;
use std::collections::HashSet;

use crate::error::Error;

/// Headers that reveal the client's address or the proxy chain it came through
pub const IDENTITY_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "x-real-ip",
    "x-originating-ip",
    "x-client-ip",
    "x-cluster-client-ip",
    "x-remote-addr",
    "x-remote-ip",
    "cf-connecting-ip",
    "true-client-ip",
    "fastly-client-ip",
    "via",
    "forwarded",
];

/// Request header a client may use to name the target
pub const TARGET_URL_HEADER: &str = "x-target-url";

/// Response header naming this proxy
pub const PROXIED_BY_HEADER: &str = "x-proxied-by";

/// Check if a header is a hop-by-hop header
pub fn is_hop_by_hop_header(name: &str) -> bool {
    let hop_by_hop_headers = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailer",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];

    hop_by_hop_headers.contains(&name.to_lowercase().as_str())
}

/// Header names listed in `Connection`, lowercased. Those are hop-by-hop for this
/// message only.
pub fn connection_listed_headers(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Check if a header leaks the client's identity
pub fn is_identity_header(name: &str) -> bool {
    IDENTITY_HEADERS.contains(&name.to_lowercase().as_str())
}

/// Build a JSON response with no-cache semantics
pub fn build_json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    response
}

/// Build the client-facing response for a pipeline error
pub fn build_error_response(error: &Error) -> Response<Body> {
    let mut response = build_json_response(
        error.status_code(),
        &json!({
            "error": error.to_string(),
            "kind": error.kind(),
        }),
    );

    if let Error::RateLimited { retry_after } = error {
        let seconds = retry_after.as_secs().max(1).to_string();
        if let Ok(value) = HeaderValue::from_str(&seconds) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_header_classification_ignores_case() {
        assert!(is_identity_header("X-Forwarded-For"));
        assert!(is_identity_header("CF-CONNECTING-IP"));
        assert!(!is_identity_header("Accept"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(!is_hop_by_hop_header("Content-Type"));
        assert!(is_hop_by_hop_header("Proxy-Connection"));
    }

    #[test]
    fn test_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.append(CONNECTION, HeaderValue::from_static("keep-alive, X-Client-Tag"));
        headers.append(CONNECTION, HeaderValue::from_static(" Upgrade ,"));
        let listed = connection_listed_headers(&headers);
        assert_eq!(listed.len(), 3);
        assert!(listed.contains("x-client-tag"));
        assert!(listed.contains("upgrade"));
        assert!(connection_listed_headers(&HeaderMap::new()).is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_response_has_retry_after() {
        let response = build_error_response(&Error::RateLimited { retry_after: Duration::from_secs(42) });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["kind"], "rate_limited");
    }
}
