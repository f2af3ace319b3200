//! Upstream proxy selection

use crate::config::UpstreamProxyConfig;
use crate::utils::ensure_scheme;
use tracing::warn;
use url::Url;

/// Maps a target scheme to the second proxy its requests are routed through
#[derive(Debug, Clone, Default)]
pub struct UpstreamSelector {
    http: Option<Url>,
    https: Option<Url>,
}

impl UpstreamSelector {
    /// Endpoints that do not parse are dropped with a warning, which means direct egress
    pub fn from_config(config: Option<&UpstreamProxyConfig>) -> Self {
        let parse = |scheme: &str, endpoint: &Option<String>| {
            let endpoint = endpoint.as_deref()?.trim();
            if endpoint.is_empty() {
                return None;
            }
            match Url::parse(&ensure_scheme(endpoint)) {
                Ok(url) if url.host_str().is_some() => Some(url),
                _ => {
                    warn!("⚠️  Ignoring invalid upstream proxy for {}: {}", scheme, endpoint);
                    None
                }
            }
        };

        match config {
            Some(config) => Self {
                http: parse("http", &config.http),
                https: parse("https", &config.https),
            },
            None => Self::default(),
        }
    }

    /// Upstream for a target scheme; `None` means connect directly
    pub fn select(&self, scheme: &str) -> Option<&Url> {
        match scheme {
            "http" => self.http.as_ref(),
            "https" => self.https.as_ref(),
            _ => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.http.is_some() || self.https.is_some()
    }

    /// Distinct configured endpoints
    pub fn endpoints(&self) -> Vec<Url> {
        let mut endpoints: Vec<Url> = self.http.iter().chain(self.https.iter()).cloned().collect();
        endpoints.dedup();
        endpoints
    }
}
