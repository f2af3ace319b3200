//! Response assembly and streaming relay
//!
//! The upstream body is never buffered: chunks are handed to hyper as they arrive.
//! An optional size cap is enforced up front from `Content-Length` and again while
//! streaming, so an undeclared oversized body is cut off with an error rather than
//! relayed in full.

use crate::error::{Error, Result};
use crate::models::{BodyStream, UpstreamResponse};
use crate::proxy::metrics::ProxyMetrics;
use crate::proxy::sanitizer::HeaderSanitizer;
use bytes::Bytes;
use futures::Stream;
use hyper::header::CONTENT_LENGTH;
use hyper::{Body, Response};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::warn;

/// Turns an upstream response into the client-facing one
pub struct ResponseAssembler {
    sanitizer: Arc<HeaderSanitizer>,
    max_response_size: Option<u64>,
    metrics: Arc<ProxyMetrics>,
}

impl ResponseAssembler {
    pub fn new(sanitizer: Arc<HeaderSanitizer>, max_response_size: Option<u64>, metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            sanitizer,
            max_response_size,
            metrics,
        }
    }

    /// Status copied verbatim, headers sanitized, body streamed
    pub fn assemble(&self, upstream: UpstreamResponse) -> Result<Response<Body>> {
        let UpstreamResponse { status, headers, body } = upstream;

        if let Some(limit) = self.max_response_size {
            let declared = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if declared.map(|len| len > limit).unwrap_or(false) {
                return Err(Error::ResponseTooLarge { limit });
            }
        }

        let body = match self.max_response_size {
            Some(limit) => Body::wrap_stream(SizeLimitedStream::new(body, limit, Arc::clone(&self.metrics))),
            None => Body::wrap_stream(body),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = self.sanitizer.sanitize_response(&headers);
        Ok(response)
    }
}

/// Passes chunks through until more than `limit` bytes have been seen, then ends
/// with `ResponseTooLarge`
pub struct SizeLimitedStream {
    inner: BodyStream,
    limit: u64,
    seen: u64,
    exceeded: bool,
    metrics: Arc<ProxyMetrics>,
}

impl SizeLimitedStream {
    pub fn new(inner: BodyStream, limit: u64, metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            inner,
            limit,
            seen: 0,
            exceeded: false,
            metrics,
        }
    }
}

impl Stream for SizeLimitedStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.exceeded {
            return Poll::Ready(None);
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.seen += chunk.len() as u64;
                if self.seen > self.limit {
                    self.exceeded = true;
                    self.metrics.record_failed();
                    warn!("✂️  Response body passed {} bytes, aborting relay", self.limit);
                    return Poll::Ready(Some(Err(Error::ResponseTooLarge { limit: self.limit })));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use futures::StreamExt;
    use hyper::header::{HeaderValue, CONTENT_ENCODING};
    use hyper::{HeaderMap, StatusCode};

    fn assembler(limit: Option<u64>) -> (ResponseAssembler, Arc<ProxyMetrics>) {
        let metrics = Arc::new(ProxyMetrics::new());
        let sanitizer = Arc::new(HeaderSanitizer::from_config(&ProxyConfig::default()));
        (ResponseAssembler::new(sanitizer, limit, Arc::clone(&metrics)), metrics)
    }

    fn chunked(chunks: &[&'static str]) -> BodyStream {
        let items: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_status_and_body_relayed() {
        let (assembler, _) = assembler(None);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert("location", HeaderValue::from_static("https://elsewhere.test/"));
        let upstream = UpstreamResponse {
            status: StatusCode::FOUND,
            headers,
            body: chunked(&["moved", " here"]),
        };

        let response = assembler.assemble(upstream).unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "https://elsewhere.test/");
        assert!(!response.headers().contains_key(CONTENT_ENCODING));
        assert!(response.headers().contains_key("x-proxied-by"));

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"moved here"));
    }

    #[test]
    fn test_declared_oversize_fails_up_front() {
        let (assembler, _) = assembler(Some(4));
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        let upstream = UpstreamResponse::from_bytes(StatusCode::OK, headers, "0123456789");
        assert!(matches!(assembler.assemble(upstream), Err(Error::ResponseTooLarge { limit: 4 })));
    }

    #[tokio::test]
    async fn test_undeclared_oversize_aborts_stream() {
        let (assembler, metrics) = assembler(Some(8));
        let upstream = UpstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: chunked(&["12345", "67890", "abc"]),
        };

        let response = assembler.assemble(upstream).unwrap();
        assert!(hyper::body::to_bytes(response.into_body()).await.is_err());
        assert_eq!(metrics.snapshot().requests_failed, 1);
    }

    #[tokio::test]
    async fn test_size_limited_stream_passes_small_bodies() {
        let metrics = Arc::new(ProxyMetrics::new());
        let stream = SizeLimitedStream::new(chunked(&["ab", "cd"]), 4, metrics);
        let chunks: Vec<Result<Bytes>> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.is_ok()));
    }
}
