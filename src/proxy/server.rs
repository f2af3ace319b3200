//! Proxy server implementation

use crate::config::ProxyConfig;
use crate::error::Error;
use crate::models::{IncomingRequest, ProxyLog};
use crate::proxy::core::{ForwardPipeline, Forwarded};
use crate::proxy::metrics::ProxyMetrics;
use crate::proxy::status::{StatusReporter, HEALTH_PATH, STATUS_PATH};
use crate::utils::{
    build_error_response, build_json_response, duration_to_ms, log_http_failure, log_http_success,
    log_incoming_request, loggable_uri, mask_ip, now,
};
use crate::{log_debug, log_error, log_info, log_proxy_transaction};
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, ALLOW};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How often idle rate-limit entries are swept
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a connection needs, shared across all of them
pub struct ServerState {
    pipeline: ForwardPipeline,
    status: StatusReporter,
    max_content_length: u64,
    log_requests: bool,
}

impl ServerState {
    pub fn new(config: &ProxyConfig, pipeline: ForwardPipeline) -> Self {
        let status = StatusReporter::new(Arc::clone(pipeline.metrics()), config);
        Self {
            pipeline,
            status,
            max_content_length: config.max_content_length,
            log_requests: config.logging.log_requests,
        }
    }

    fn metrics(&self) -> &ProxyMetrics {
        self.pipeline.metrics()
    }
}

pub struct ProxyServer {
    listen_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl ProxyServer {
    /// Create a proxy server with the pooled outbound client
    pub fn with_config(config: &ProxyConfig) -> Result<Self> {
        let metrics = Arc::new(ProxyMetrics::new());
        let pipeline = ForwardPipeline::from_config(config, metrics).context("Failed to build forwarding pipeline")?;
        Self::with_pipeline(config, pipeline)
    }

    /// Create a proxy server around an existing pipeline
    pub fn with_pipeline(config: &ProxyConfig, pipeline: ForwardPipeline) -> Result<Self> {
        Ok(Self {
            listen_addr: config.listen_addr()?,
            state: Arc::new(ServerState::new(config, pipeline)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn start(self) -> Result<()> {
        let listener = std::net::TcpListener::bind(self.listen_addr)
            .with_context(|| format!("Failed to bind {}", self.listen_addr))?;

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("⚠️  Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("🛑 Shutdown signal received, draining connections");
        };

        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` completes
    pub async fn serve<F>(self, listener: std::net::TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        let eviction = spawn_eviction_task(Arc::clone(&self.state));

        let state = self.state;
        let make_svc = make_service_fn(move |conn: &hyper::server::conn::AddrStream| {
            let remote_addr = conn.remote_addr();
            let state = Arc::clone(&state);
            log_debug!("New connection from: {}", remote_addr);

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, remote_addr, state).await }
                }))
            }
        });

        let server = Server::from_tcp(listener)
            .with_context(|| format!("Failed to listen on {}", local_addr))?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown);

        info!("🚀 Proxy server listening on http://{}", local_addr);
        log_info!("Test with: curl 'http://{}/?url=http://httpbin.org/ip'", local_addr);

        let result = server.await;
        eviction.abort();

        if let Err(e) = result {
            log_error!("Server error: {}", e);
            return Err(e).context("Proxy server failed");
        }

        info!("👋 Proxy server stopped");
        Ok(())
    }
}

fn spawn_eviction_task(state: Arc<ServerState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        // First tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Some(limiter) = state.pipeline.admission().rate_limiter() {
                let evicted = limiter.evict_stale();
                if evicted > 0 {
                    log_debug!("🧹 Evicted {} idle rate-limit entries ({} tracked)", evicted, limiter.tracked_clients());
                }
            }
        }
    })
}

/// Handle one client request: local endpoints, or the forwarding pipeline
pub async fn handle_request(
    req: Request<Body>,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> std::result::Result<Response<Body>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = loggable_uri(req.uri());

    log_incoming_request(method.as_str(), &uri, &remote_addr);

    if let Some(response) = local_endpoint(&req, &state) {
        return Ok(response);
    }

    if method == Method::CONNECT {
        let error = Error::MethodNotSupported("CONNECT tunnelling is not supported".to_string());
        state.metrics().record_rejected();
        return Ok(finish(&state, &method, &uri, remote_addr, start, false, Err(error)));
    }

    let incoming = match IncomingRequest::from_hyper(req, remote_addr, state.max_content_length).await {
        Ok(incoming) => incoming,
        Err(error) => {
            state.metrics().record_error(&error);
            return Ok(finish(&state, &method, &uri, remote_addr, start, false, Err(error)));
        }
    };

    let forwarded = state.pipeline.forward(&incoming).await;
    let target = forwarded.logged_target().unwrap_or(uri);
    let Forwarded { upstream, result, .. } = forwarded;

    Ok(finish(&state, &method, &target, remote_addr, start, upstream.is_some(), result))
}

/// `/proxy/status` and `/proxy/health`, only when addressed in origin form
fn local_endpoint(req: &Request<Body>, state: &ServerState) -> Option<Response<Body>> {
    if req.uri().scheme().is_some() {
        return None;
    }

    let path = req.uri().path();
    if path != STATUS_PATH && path != HEALTH_PATH {
        return None;
    }

    if req.method() != Method::GET {
        let mut response = build_json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &serde_json::json!({ "error": "Method not allowed", "kind": "method_not_allowed" }),
        );
        response.headers_mut().insert(ALLOW, HeaderValue::from_static("GET"));
        return Some(response);
    }

    let body = if path == STATUS_PATH {
        serde_json::to_value(state.status.status())
    } else {
        serde_json::to_value(state.status.health())
    };

    Some(match body {
        Ok(body) => build_json_response(StatusCode::OK, &body),
        Err(e) => build_error_response(&Error::Serialization(e)),
    })
}

/// Log the outcome and turn it into the client response
fn finish(
    state: &ServerState,
    method: &Method,
    target: &str,
    remote_addr: SocketAddr,
    start: Instant,
    via_upstream: bool,
    result: crate::error::Result<Response<Body>>,
) -> Response<Body> {
    let elapsed = start.elapsed();

    let (status, error, error_kind) = match &result {
        Ok(response) => (Some(response.status().as_u16()), None, None),
        Err(e) => (Some(e.status_code().as_u16()), Some(e.to_string()), Some(e.kind().to_string())),
    };

    let entry = ProxyLog {
        timestamp: now(),
        method: method.to_string(),
        target: Some(target.to_string()),
        client: mask_ip(remote_addr.ip()),
        via_upstream,
        status,
        error,
        error_kind,
        duration_ms: duration_to_ms(elapsed),
    };
    log_proxy_transaction!(&entry);

    match result {
        Ok(response) => {
            if state.log_requests {
                log_http_success(method.as_str(), target, response.status(), elapsed.as_millis());
            }
            response
        }
        Err(error) => {
            log_http_failure(method.as_str(), target, elapsed.as_millis(), &error);
            build_error_response(&error)
        }
    }
}
