//! Core forwarding pipeline
//!
//! Per request: sanitize headers, resolve the target, run admission, pick the route,
//! dispatch, then assemble the client-facing response. The dispatcher sits behind a
//! trait so the pipeline can run against a stub.

use async_trait::async_trait;
use hyper::{Body, Response};
use std::sync::Arc;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::middleware::AdmissionController;
use crate::models::{IncomingRequest, OutboundRequest, ResolvedTarget, UpstreamResponse};
use crate::proxy::http_client::HttpClient;
use crate::proxy::metrics::ProxyMetrics;
use crate::proxy::resolver::resolve_target;
use crate::proxy::sanitizer::HeaderSanitizer;
use crate::proxy::streaming::ResponseAssembler;
use crate::proxy::upstream::UpstreamSelector;
use crate::utils::{log_forwarding, redact_url};

/// Issues one outbound request. Exactly one attempt, never retried.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// Result of pushing one request through the pipeline, with what was learned
/// along the way for logging
pub struct Forwarded {
    pub target: Option<ResolvedTarget>,
    pub upstream: Option<Url>,
    pub result: Result<Response<Body>>,
}

impl Forwarded {
    /// Resolved target as written to logs, credentials removed
    pub fn logged_target(&self) -> Option<String> {
        self.target.as_ref().map(|target| redact_url(&target.url))
    }
}

pub struct ForwardPipeline {
    sanitizer: Arc<HeaderSanitizer>,
    admission: AdmissionController,
    upstreams: UpstreamSelector,
    dispatcher: Arc<dyn Dispatcher>,
    assembler: ResponseAssembler,
    metrics: Arc<ProxyMetrics>,
}

impl ForwardPipeline {
    /// Pipeline with the pooled reqwest dispatcher
    pub fn from_config(config: &ProxyConfig, metrics: Arc<ProxyMetrics>) -> Result<Self> {
        let upstreams = UpstreamSelector::from_config(config.upstream_proxy.as_ref());
        let dispatcher = Arc::new(HttpClient::from_config(config, &upstreams)?);
        Ok(Self::with_dispatcher(config, dispatcher, metrics))
    }

    pub fn with_dispatcher(config: &ProxyConfig, dispatcher: Arc<dyn Dispatcher>, metrics: Arc<ProxyMetrics>) -> Self {
        let sanitizer = Arc::new(HeaderSanitizer::from_config(config));
        Self {
            admission: AdmissionController::from_config(config, Arc::clone(&metrics)),
            upstreams: UpstreamSelector::from_config(config.upstream_proxy.as_ref()),
            assembler: ResponseAssembler::new(Arc::clone(&sanitizer), config.max_response_size, Arc::clone(&metrics)),
            sanitizer,
            dispatcher,
            metrics,
        }
    }

    pub async fn forward(&self, request: &IncomingRequest) -> Forwarded {
        let outbound_headers = self.sanitizer.sanitize_request(&request.headers);

        let target = match resolve_target(request) {
            Ok(target) => target,
            Err(e) => {
                self.metrics.record_rejected();
                return Forwarded { target: None, upstream: None, result: Err(e) };
            }
        };

        if let Err(e) = self.admission.admit(request.client_addr.ip(), &target).await {
            return Forwarded { target: Some(target), upstream: None, result: Err(e) };
        }

        let upstream = self.upstreams.select(target.scheme()).cloned();
        log_forwarding(
            request.method.as_str(),
            &redact_url(&target.url),
            upstream.as_ref().map(redact_url).as_deref(),
        );

        let outbound = OutboundRequest {
            method: request.method.clone(),
            target: target.clone(),
            headers: outbound_headers,
            body: request.body.clone(),
            upstream: upstream.clone(),
        };

        let result = match self.dispatcher.dispatch(outbound).await {
            Ok(response) => self.assembler.assemble(response),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.metrics.record_failed();
        }

        Forwarded { target: Some(target), upstream, result }
    }

    pub fn metrics(&self) -> &Arc<ProxyMetrics> {
        &self.metrics
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }
}
