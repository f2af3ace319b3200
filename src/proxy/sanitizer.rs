//! Header sanitization for both directions of the relay
//!
//! Requests lose everything that identifies the client or the hop it came through,
//! then pick up the configured additions. Responses lose headers that the re-framed
//! body invalidates and gain `X-Proxied-By`.

use crate::config::ProxyConfig;
use crate::utils::{
    connection_listed_headers, is_hop_by_hop_header, is_identity_header, PROXIED_BY_HEADER, TARGET_URL_HEADER,
};
use hyper::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HOST, USER_AGENT};
use hyper::HeaderMap;
use std::collections::HashSet;
use tracing::warn;

pub struct HeaderSanitizer {
    /// Extra request headers to drop, lowercased
    remove: HashSet<String>,
    add: Vec<(HeaderName, HeaderValue)>,
    user_agents: Vec<HeaderValue>,
    rotate_user_agent: bool,
    proxy_ident: HeaderValue,
}

impl HeaderSanitizer {
    /// Build from configuration. Entries that are not valid header names or values
    /// are skipped with a warning.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let remove = config
            .remove_headers
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        let add = config
            .add_headers
            .iter()
            .filter_map(|(name, value)| {
                match (HeaderName::from_bytes(name.trim().as_bytes()), HeaderValue::from_str(value)) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        warn!("⚠️  Skipping invalid add_headers entry: {}", name);
                        None
                    }
                }
            })
            .collect();

        let user_agents = config
            .user_agents
            .iter()
            .filter_map(|ua| HeaderValue::from_str(ua).ok())
            .collect();

        let proxy_ident = HeaderValue::from_str(&config.proxy_ident).unwrap_or_else(|_| {
            warn!("⚠️  Invalid proxy_ident, using the default");
            HeaderValue::from_static(concat!("ipmask-proxy/", env!("CARGO_PKG_VERSION")))
        });

        Self {
            remove,
            add,
            user_agents,
            rotate_user_agent: config.rotate_user_agent,
            proxy_ident,
        }
    }

    /// True when a client header must not reach the target
    pub fn strips_request_header(&self, name: &HeaderName) -> bool {
        let name = name.as_str();
        name == HOST.as_str()
            || name == CONTENT_LENGTH.as_str()
            || name == ACCEPT_ENCODING.as_str()
            || name == TARGET_URL_HEADER
            || is_identity_header(name)
            || is_hop_by_hop_header(name)
            || self.remove.contains(name)
    }

    /// Outbound headers for a client request. Returns a fresh map; the inbound one is untouched.
    pub fn sanitize_request(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut outbound = HeaderMap::with_capacity(inbound.len() + self.add.len());
        let listed = connection_listed_headers(inbound);

        for (name, value) in inbound {
            if !self.strips_request_header(name) && !listed.contains(name.as_str()) {
                outbound.append(name.clone(), value.clone());
            }
        }

        for (name, value) in &self.add {
            outbound.insert(name.clone(), value.clone());
        }

        if self.rotate_user_agent || !outbound.contains_key(USER_AGENT) {
            if let Some(ua) = self.pick_user_agent() {
                outbound.insert(USER_AGENT, ua);
            }
        }

        outbound
    }

    /// Client-facing headers for an upstream response
    pub fn sanitize_response(&self, upstream: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(upstream.len() + 1);
        let listed = connection_listed_headers(upstream);

        for (name, value) in upstream {
            if name == CONTENT_ENCODING || is_hop_by_hop_header(name.as_str()) || listed.contains(name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        headers.insert(HeaderName::from_static(PROXIED_BY_HEADER), self.proxy_ident.clone());
        headers
    }

    fn pick_user_agent(&self) -> Option<HeaderValue> {
        if self.user_agents.is_empty() {
            return None;
        }
        let index = fastrand::usize(..self.user_agents.len());
        self.user_agents.get(index).cloned()
    }
}
