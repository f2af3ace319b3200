//! Forwarding pipeline against a recording dispatcher

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use hyper::{Body, HeaderMap, Method, Request, StatusCode, Uri};
use ipmask_proxy::config::ProxyConfig;
use ipmask_proxy::error::{Error, Result};
use ipmask_proxy::models::{IncomingRequest, OutboundRequest, TargetSource, UpstreamResponse};
use ipmask_proxy::proxy::{Dispatcher, ForwardPipeline, ProxyMetrics, ProxyServer};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Answers `200 {"ip":"9.9.9.9"}` with a `Content-Encoding` the relay must drop,
/// and keeps every request it was asked to send
#[derive(Default)]
struct RecordingDispatcher {
    seen: Mutex<Vec<OutboundRequest>>,
}

impl RecordingDispatcher {
    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last(&self) -> OutboundRequest {
        self.seen.lock().unwrap().last().cloned().expect("no request dispatched")
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        self.seen.lock().unwrap().push(request);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        Ok(UpstreamResponse::from_bytes(StatusCode::OK, headers, r#"{"ip":"9.9.9.9"}"#))
    }
}

fn pipeline(config: ProxyConfig) -> (ForwardPipeline, Arc<RecordingDispatcher>, Arc<ProxyMetrics>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let metrics = Arc::new(ProxyMetrics::new());
    let pipeline = ForwardPipeline::with_dispatcher(&config, dispatcher.clone(), Arc::clone(&metrics));
    (pipeline, dispatcher, metrics)
}

fn client_addr() -> SocketAddr {
    "203.0.113.7:51000".parse().unwrap()
}

fn incoming(uri: &str, headers: &[(&str, &str)]) -> IncomingRequest {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    let uri: Uri = uri.parse().unwrap();
    IncomingRequest::new(Method::GET, uri, map, Bytes::new(), client_addr())
}

#[tokio::test]
async fn anonymized_request_scenario() {
    let (pipeline, dispatcher, _) = pipeline(ProxyConfig::default());
    let request = incoming(
        "/?url=https://example.com/ip",
        &[("X-Forwarded-For", "1.2.3.4"), ("Host", "localhost:8888"), ("Accept", "application/json")],
    );

    let forwarded = pipeline.forward(&request).await;
    let response = forwarded.result.unwrap();

    let outbound = dispatcher.last();
    assert_eq!(outbound.target.as_str(), "https://example.com/ip");
    assert_eq!(outbound.target.source, TargetSource::QueryParam);
    assert!(!outbound.headers.contains_key("x-forwarded-for"));
    assert!(!outbound.headers.contains_key("host"));
    assert_eq!(outbound.headers["accept"], "application/json");
    assert!(outbound.upstream.is_none());

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(CONTENT_ENCODING));
    assert!(!response.headers().contains_key("connection"));
    assert!(response.headers().contains_key("x-proxied-by"));
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, Bytes::from_static(br#"{"ip":"9.9.9.9"}"#));
}

#[tokio::test]
async fn identity_headers_never_leave_in_any_case() {
    let (pipeline, dispatcher, _) = pipeline(ProxyConfig::default());
    let request = incoming(
        "/example.com/",
        &[
            ("x-real-ip", "1.1.1.1"),
            ("X-REAL-IP", "2.2.2.2"),
            ("Forwarded", "for=1.1.1.1"),
            ("Via", "1.1 corp-proxy"),
            ("CF-Connecting-IP", "1.1.1.1"),
            ("True-Client-IP", "1.1.1.1"),
            ("X-Client-IP", "1.1.1.1"),
        ],
    );

    pipeline.forward(&request).await.result.unwrap();
    let outbound = dispatcher.last();
    for name in ["x-real-ip", "forwarded", "via", "cf-connecting-ip", "true-client-ip", "x-client-ip"] {
        assert!(!outbound.headers.contains_key(name), "{} leaked", name);
    }
    assert_eq!(outbound.target.as_str(), "http://example.com/");
}

#[tokio::test]
async fn query_parameter_beats_header() {
    let (pipeline, dispatcher, _) = pipeline(ProxyConfig::default());
    let request = incoming("/?url=http://from-query.test/", &[("X-Target-URL", "http://from-header.test/")]);

    pipeline.forward(&request).await.result.unwrap();
    let outbound = dispatcher.last();
    assert_eq!(outbound.target.host(), "from-query.test");
    assert!(!outbound.headers.contains_key("x-target-url"));
}

#[tokio::test]
async fn blocked_domain_is_never_dispatched() {
    let config = ProxyConfig {
        blocked_domains: vec!["bad.example".into()],
        ..ProxyConfig::default()
    };
    let (pipeline, dispatcher, metrics) = pipeline(config);

    let forwarded = pipeline.forward(&incoming("/?url=http://bad.example/", &[])).await;
    let error = forwarded.result.unwrap_err();
    assert!(matches!(error, Error::DomainBlocked(_)));
    assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(dispatcher.calls(), 0);
    assert_eq!(metrics.snapshot().requests_rejected, 1);
    assert_eq!(metrics.snapshot().requests_processed, 0);
}

#[tokio::test]
async fn rate_limit_rejects_the_request_after_the_limit() {
    let config = ProxyConfig {
        rate_limit_enabled: true,
        requests_per_minute: 3,
        ..ProxyConfig::default()
    };
    let (pipeline, dispatcher, metrics) = pipeline(config);
    let request = incoming("/?url=http://example.com/", &[]);

    for _ in 0..3 {
        assert!(pipeline.forward(&request).await.result.is_ok());
    }
    let error = pipeline.forward(&request).await.result.unwrap_err();
    assert!(matches!(error, Error::RateLimited { .. }));
    assert_eq!(dispatcher.calls(), 3);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.requests_processed, 3);
    assert_eq!(snapshot.requests_rejected, 1);
}

#[tokio::test]
async fn identical_requests_yield_identical_responses() {
    let (pipeline, _, _) = pipeline(ProxyConfig::default());
    let request = incoming("/?url=http://example.com/", &[("Accept", "*/*")]);

    let first = pipeline.forward(&request).await.result.unwrap();
    let second = pipeline.forward(&request).await.result.unwrap();
    assert_eq!(first.status(), second.status());
    assert_eq!(first.headers(), second.headers());
}

#[tokio::test]
async fn server_relays_over_tcp() {
    let config = ProxyConfig {
        rate_limit_enabled: true,
        requests_per_minute: 1,
        ..ProxyConfig::default()
    };
    let (pipeline, dispatcher, _) = pipeline(config.clone());
    let server = ProxyServer::with_pipeline(&config, pipeline).unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let health: serde_json::Value = client
        .get(format!("http://{}/proxy/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let response = client
        .get(format!("http://{}/?url=http://example.com/ip", addr))
        .header("X-Forwarded-For", "1.2.3.4")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("x-proxied-by"));
    assert!(!response.headers().contains_key("content-encoding"));
    assert_eq!(response.text().await.unwrap(), r#"{"ip":"9.9.9.9"}"#);
    assert!(!dispatcher.last().headers.contains_key("x-forwarded-for"));

    let limited = client
        .get(format!("http://{}/?url=http://example.com/ip", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(limited.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key("retry-after"));
    let body: serde_json::Value = limited.json().await.unwrap();
    assert_eq!(body["kind"], "rate_limited");

    let status: serde_json::Value = client
        .get(format!("http://{}/proxy/status", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["requests_processed"], 1);
    assert_eq!(status["requests_rejected"], 1);

    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn handle_request_rejects_missing_target() {
    let (pipeline, _, _) = pipeline(ProxyConfig::default());
    let state = Arc::new(ipmask_proxy::proxy::ServerState::new(&ProxyConfig::default(), pipeline));
    let req = Request::get("/").body(Body::empty()).unwrap();

    let response = ipmask_proxy::proxy::handle_request(req, client_addr(), state).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "no_target_specified");
}
