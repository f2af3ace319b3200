//! Target URL resolution
//!
//! A request names its destination through one of three channels, checked in order:
//! the `url` query parameter, the `X-Target-URL` header, then the request path itself.

use crate::error::{Error, Result};
use crate::models::{IncomingRequest, ResolvedTarget, TargetSource};
use crate::utils::{ensure_scheme, redact_credentials, TARGET_URL_HEADER};
use url::Url;

/// Query parameter carrying the target
pub const TARGET_QUERY_PARAM: &str = "url";

/// Resolve the destination of a client request
pub fn resolve_target(request: &IncomingRequest) -> Result<ResolvedTarget> {
    let (raw, source) = raw_target(request).ok_or(Error::NoTargetSpecified)?;
    let url = parse_target(&raw)?;
    Ok(ResolvedTarget { url, source })
}

fn raw_target(request: &IncomingRequest) -> Option<(String, TargetSource)> {
    if let Some(url) = request.query_param(TARGET_QUERY_PARAM).filter(|v| !v.trim().is_empty()) {
        return Some((url.trim().to_string(), TargetSource::QueryParam));
    }

    if let Some(header) = request
        .headers
        .get(TARGET_URL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some((header.to_string(), TargetSource::Header));
    }

    // Absolute-form: a client configured to use us as its HTTP proxy
    if request.is_absolute_form() {
        return Some((request.uri.to_string(), TargetSource::Path));
    }

    let path = request.uri.path();
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return None;
    }

    let raw = match request.uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    };
    Some((raw, TargetSource::Path))
}

fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(&ensure_scheme(raw))
        .map_err(|e| Error::InvalidTarget(format!("{}: {}", redact_credentials(raw), e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidTarget(format!("unsupported scheme: {}", url.scheme())));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidTarget(format!("missing host: {}", redact_credentials(raw))));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hyper::{HeaderMap, Method, Uri};

    fn request(uri: &str, target_header: Option<&str>) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        if let Some(value) = target_header {
            headers.insert(TARGET_URL_HEADER, value.parse().unwrap());
        }
        let uri: Uri = uri.parse().unwrap();
        IncomingRequest::new(Method::GET, uri, headers, Bytes::new(), "10.0.0.1:4000".parse().unwrap())
    }

    #[test]
    fn test_query_param_beats_header() {
        let target = resolve_target(&request("/?url=https://a.test/x", Some("https://b.test/y"))).unwrap();
        assert_eq!(target.as_str(), "https://a.test/x");
        assert_eq!(target.source, TargetSource::QueryParam);
    }

    #[test]
    fn test_header_beats_path() {
        let target = resolve_target(&request("/c.test/z", Some("b.test/y"))).unwrap();
        assert_eq!(target.as_str(), "http://b.test/y");
        assert_eq!(target.source, TargetSource::Header);
    }

    #[test]
    fn test_path_gets_default_scheme_and_keeps_query() {
        let target = resolve_target(&request("/example.com/x?q=1&r=2", None)).unwrap();
        assert_eq!(target.as_str(), "http://example.com/x?q=1&r=2");
        assert_eq!(target.source, TargetSource::Path);
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), 80);
    }

    #[test]
    fn test_path_with_explicit_scheme() {
        let target = resolve_target(&request("/https://example.com/secure", None)).unwrap();
        assert_eq!(target.scheme(), "https");
        assert_eq!(target.port(), 443);
    }

    #[test]
    fn test_absolute_form_used_as_is() {
        let target = resolve_target(&request("http://example.com:8080/a?b=c", None)).unwrap();
        assert_eq!(target.as_str(), "http://example.com:8080/a?b=c");
        assert_eq!(target.port(), 8080);
    }

    #[test]
    fn test_no_target() {
        assert!(matches!(resolve_target(&request("/", None)), Err(Error::NoTargetSpecified)));
        assert!(matches!(resolve_target(&request("/?url=", None)), Err(Error::NoTargetSpecified)));
    }

    #[test]
    fn test_invalid_target() {
        let err = resolve_target(&request("/?url=http://", None)).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_non_http_scheme_refused() {
        let err = resolve_target(&request("/?url=ftp://files.test/a", None)).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(ref msg) if msg.contains("ftp")));

        let err = resolve_target(&request("/", Some("file:///etc/passwd"))).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }

    #[test]
    fn test_invalid_target_message_hides_credentials() {
        let err = resolve_target(&request("/?url=http://alice:s3cret@", None)).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
        assert!(!err.to_string().contains("s3cret"));
    }
}
