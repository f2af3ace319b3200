//! Logging utility functions for proxy operations

use crate::error::Error;
use crate::log_debug;
use crate::utils::redact_credentials;
use hyper::{StatusCode, Uri};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};

/// Mask the host part of a client address for info-level logs.
///
/// IPv4 keeps the first two octets (`192.168.xxx.xxx`), IPv6 keeps the first two groups.
pub fn mask_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!("{}.{}.xxx.xxx", octets[0], octets[1])
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            format!("{:x}:{:x}:xxxx::", segments[0], segments[1])
        }
    }
}

/// Request URI in a form fit for logs. The query string is dropped since it can carry
/// the target, and credentials embedded in the path are removed.
pub fn loggable_uri(uri: &Uri) -> String {
    let text = uri.to_string();
    let without_query = match text.split_once('?') {
        Some((head, _)) => head,
        None => text.as_str(),
    };
    redact_credentials(without_query)
}

/// Log incoming request information
pub fn log_incoming_request(method: &str, uri: &str, remote_addr: &SocketAddr) {
    info!("📥 {} {} from {}", method, truncate(uri, 80), mask_ip(remote_addr.ip()));
    log_debug!("🔍 REQUEST DETAILS:\n  Method: {}\n  URI: {}\n  Remote: {}",
               method, uri, remote_addr);
}

/// Log forwarding decision
pub fn log_forwarding(method: &str, target: &str, upstream: Option<&str>) {
    match upstream {
        Some(upstream) => log_debug!("🔄 Forwarding {} {} via upstream {}", method, target, upstream),
        None => log_debug!("🔄 Forwarding {} {} directly", method, target),
    }
}

/// Log a relayed response
pub fn log_http_success(method: &str, target: &str, status: StatusCode, total_time: u128) {
    info!("✅ {} {} → {} ({}ms)", method, truncate(target, 80), status, total_time);
}

/// Log a rejected or failed request
pub fn log_http_failure(method: &str, target: &str, total_time: u128, error: &Error) {
    if error.is_rejection() {
        warn!("🚫 {} {} rejected ({}ms): {}", method, truncate(target, 80), total_time, error);
    } else {
        warn!("❌ {} {} failed ({}ms): {}", method, truncate(target, 80), total_time, error);
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(max).collect();
        out.push('…');
        out
    }
}
