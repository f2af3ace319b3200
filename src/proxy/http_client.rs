//! Outbound HTTP client management
//!
//! One pooled `reqwest` client for direct egress and one per distinct upstream proxy,
//! all built at startup and shared across requests:
//! - redirects are relayed, never followed
//! - one timeout covers the full request/response cycle
//! - compressed bodies are decoded before they reach the relay

use crate::config::{AuthConfig, ProxyConfig};
use crate::error::{Error, Result};
use crate::models::{OutboundRequest, UpstreamResponse};
use crate::proxy::core::Dispatcher;
use crate::proxy::upstream::UpstreamSelector;
use crate::utils::redact_url;
use async_trait::async_trait;
use futures::TryStreamExt;
use hyper::header::{AUTHORIZATION, CONTENT_ENCODING};
use hyper::HeaderMap;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Pooled outbound clients keyed by route
pub struct HttpClient {
    direct: reqwest::Client,
    /// Keyed by upstream endpoint URL
    via_upstream: HashMap<String, reqwest::Client>,
    timeout: Duration,
    auth: Option<AuthConfig>,
}

impl HttpClient {
    /// Build every client the configuration can route through
    pub fn from_config(config: &ProxyConfig, upstreams: &UpstreamSelector) -> Result<Self> {
        info!("🚀 Initializing outbound HTTP clients with connection pooling");
        info!("   Max idle connections per host: {}", config.http_client.max_idle_per_host);
        info!("   Idle timeout: {}s", config.http_client.idle_timeout_secs);
        info!("   Request timeout: {}s", config.timeout);
        info!("   Connect timeout: {}s", config.connect_timeout);
        if !config.verify_ssl {
            warn!("⚠️  TLS certificate verification is DISABLED for outbound requests");
        }

        let direct = Self::builder(config)
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let mut via_upstream = HashMap::new();
        for endpoint in upstreams.endpoints() {
            let proxy = reqwest::Proxy::all(endpoint.as_str())
                .map_err(|e| Error::Config(format!("Invalid upstream proxy {}: {}", redact_url(&endpoint), e)))?;
            let client = Self::builder(config)
                .proxy(proxy)
                .build()
                .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
            info!("   Upstream route: {}:{}", endpoint.host_str().unwrap_or_default(), endpoint.port_or_known_default().unwrap_or(0));
            via_upstream.insert(endpoint.to_string(), client);
        }

        info!("✅ Outbound HTTP clients initialized ({} upstream route(s))", via_upstream.len());

        Ok(Self {
            direct,
            via_upstream,
            timeout: config.timeout_duration(),
            auth: config.auth.clone(),
        })
    }

    fn builder(config: &ProxyConfig) -> reqwest::ClientBuilder {
        let pool = &config.http_client;
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout_duration())
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .tcp_nodelay(true);

        if pool.tcp_keepalive {
            builder = builder.tcp_keepalive(Duration::from_secs(pool.tcp_keepalive_interval_secs));
        }
        builder
    }

    fn client_for(&self, upstream: Option<&Url>) -> Result<&reqwest::Client> {
        match upstream {
            None => Ok(&self.direct),
            Some(endpoint) => self
                .via_upstream
                .get(endpoint.as_str())
                .ok_or_else(|| Error::Config(format!("No client configured for upstream {}", redact_url(endpoint)))),
        }
    }

    /// Map a reqwest failure onto the typed upstream errors
    fn classify(&self, err: reqwest::Error) -> Error {
        let err = err.without_url();
        if err.is_timeout() {
            return Error::UpstreamTimeout(self.timeout);
        }
        if is_tls_error(&err) {
            return Error::UpstreamTls(error_chain(&err));
        }
        if err.is_connect() {
            return Error::UpstreamUnreachable(error_chain(&err));
        }
        Error::Upstream(error_chain(&err))
    }
}

#[async_trait]
impl Dispatcher for HttpClient {
    async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        let OutboundRequest { method, target, mut headers, body, upstream } = request;
        let client = self.client_for(upstream.as_ref())?;

        debug!(
            "📡 {} {} ({})",
            method,
            redact_url(&target.url),
            if upstream.is_some() { "via upstream" } else { "direct" }
        );

        if self.auth.is_some() {
            headers.remove(AUTHORIZATION);
        }

        let mut builder = client.request(method, target.url.clone()).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }
        if let Some(auth) = &self.auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers = response.headers().clone();

        // Decoded bodies lose their Content-Encoding; one left over means the bytes are still encoded
        if let Some(encoding) = undecoded_encoding(&headers) {
            warn!("⚠️  {} answered with unsupported content-encoding {}", redact_url(&target.url), encoding);
            return Err(Error::Upstream(format!("unsupported content-encoding {}", encoding)));
        }
        let timeout = self.timeout;
        let body = response.bytes_stream().map_err(move |e| {
            if e.is_timeout() {
                Error::UpstreamTimeout(timeout)
            } else {
                Error::Upstream(error_chain(&e.without_url()))
            }
        });

        Ok(UpstreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

/// Content codings still applied to a response body, `identity` excluded
fn undecoded_encoding(headers: &HeaderMap) -> Option<String> {
    let codings: Vec<String> = headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .flat_map(|value| value.split(',').map(|c| c.trim().to_ascii_lowercase()).collect::<Vec<_>>())
        .filter(|coding| !coding.is_empty() && coding != "identity")
        .collect();

    if codings.is_empty() {
        None
    } else {
        Some(codings.join(", "))
    }
}

/// True when the failure came out of the TLS layer
fn is_tls_error(err: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        if current.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if io.get_ref().map(|inner| inner.is::<rustls::Error>()).unwrap_or(false) {
                return true;
            }
        }
        source = current.source();
    }

    let text = error_chain(err).to_lowercase();
    text.contains("certificate") || text.contains("tls handshake") || text.contains("invalid peer")
}

/// Flatten an error and its sources into one line
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(current) = source {
        let text = current.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = current.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamProxyConfig;

    #[test]
    fn test_clients_built_per_upstream() {
        let config = ProxyConfig {
            upstream_proxy: Some(UpstreamProxyConfig {
                http: Some("http://127.0.0.1:3128".into()),
                https: Some("http://127.0.0.1:3129".into()),
            }),
            ..ProxyConfig::default()
        };
        let upstreams = UpstreamSelector::from_config(config.upstream_proxy.as_ref());
        let client = HttpClient::from_config(&config, &upstreams).unwrap();
        assert_eq!(client.via_upstream.len(), 2);
        assert!(client.client_for(upstreams.select("https")).is_ok());
        assert!(client.client_for(None).is_ok());

        let unknown = Url::parse("http://10.9.9.9:1").unwrap();
        assert!(client.client_for(Some(&unknown)).is_err());
    }

    #[test]
    fn test_undecoded_encoding() {
        let mut headers = HeaderMap::new();
        assert_eq!(undecoded_encoding(&headers), None);

        headers.insert(CONTENT_ENCODING, "identity".parse().unwrap());
        assert_eq!(undecoded_encoding(&headers), None);

        headers.insert(CONTENT_ENCODING, "ZSTD".parse().unwrap());
        assert_eq!(undecoded_encoding(&headers).as_deref(), Some("zstd"));

        headers.insert(CONTENT_ENCODING, "gzip, br".parse().unwrap());
        assert_eq!(undecoded_encoding(&headers).as_deref(), Some("gzip, br"));
    }

    #[test]
    fn test_error_chain_and_tls_detection() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, rustls::Error::General("bad".into()));
        assert!(is_tls_error(&io));

        let plain = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(!is_tls_error(&plain));
        assert_eq!(error_chain(&plain), "connection refused");
    }
}
