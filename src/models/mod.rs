use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use hyper::body::HttpBody;
use hyper::header::CONTENT_LENGTH;
use hyper::{Body, HeaderMap, Method, Request, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::error::{Error, Result};

/// A client request as received, with its body already read
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub uri: Uri,
    /// Query parameters in arrival order, repeats kept
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: SocketAddr,
}

impl IncomingRequest {
    /// Build from a hyper request, reading at most `max_body` bytes of body
    pub async fn from_hyper(req: Request<Body>, client_addr: SocketAddr, max_body: u64) -> Result<Self> {
        let (parts, body) = req.into_parts();

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(len) = declared {
            if len > max_body {
                return Err(Error::RequestTooLarge { limit: max_body });
            }
        }

        let body = read_body_limited(body, max_body).await?;
        Ok(Self::new(parts.method, parts.uri, parts.headers, body, client_addr))
    }

    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes, client_addr: SocketAddr) -> Self {
        let query = uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            method,
            uri,
            query,
            headers,
            body,
            client_addr,
        }
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// True when the client sent an absolute-form URI (`GET http://host/path`)
    pub fn is_absolute_form(&self) -> bool {
        self.uri.scheme().is_some() && self.uri.authority().is_some()
    }
}

/// Collect a body, failing as soon as it grows past `limit`
pub async fn read_body_limited(mut body: Body, limit: u64) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(Error::RequestTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Which input channel named the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    QueryParam,
    Header,
    Path,
}

/// Absolute destination URL of one request; always carries a scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: Url,
    pub source: TargetSource,
}

impl ResolvedTarget {
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Lowercased host without port
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Everything the dispatcher needs for one outbound call
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub target: ResolvedTarget,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Upstream proxy to route through, `None` for direct egress
    pub upstream: Option<Url>,
}

/// Streamed response body
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Raw response from the target (or upstream proxy), body not yet read
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl UpstreamResponse {
    /// Response with an in-memory body, mostly for stubs
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            body: Box::pin(futures::stream::once(async move { Ok(body) })),
        }
    }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// One forwarded (or refused) request, as written to the transaction log.
/// Carries no bodies and no credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyLog {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub target: Option<String>,
    /// Client address with host bits masked
    pub client: String,
    pub via_upstream: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}
