//! Target address blocking
//!
//! Rejects targets that are, or resolve to, addresses inside configured networks,
//! so the proxy cannot be pointed at loopback or internal ranges.

use crate::error::{Error, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::debug;
use url::{Host, Url};

#[derive(Debug, Clone, Default)]
pub struct AddressPolicy {
    networks: Vec<IpNet>,
}

impl AddressPolicy {
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self { networks }
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// True when `ip` falls inside a blocked network.
    /// IPv4-mapped IPv6 addresses are checked as their IPv4 form too.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        let mapped = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4),
            IpAddr::V4(_) => None,
        };
        self.networks
            .iter()
            .any(|net| net.contains(&ip) || mapped.map(|m| net.contains(&m)).unwrap_or(false))
    }

    /// Check a target. Hostnames are resolved only when networks are configured; a
    /// name that does not resolve is let through and fails later at dispatch.
    pub async fn check(&self, url: &Url) -> Result<()> {
        if self.networks.is_empty() {
            return Ok(());
        }

        let port = url.port_or_known_default().unwrap_or(80);
        match url.host() {
            Some(Host::Ipv4(v4)) => self.check_ip(IpAddr::V4(v4)),
            Some(Host::Ipv6(v6)) => self.check_ip(IpAddr::V6(v6)),
            Some(Host::Domain(domain)) => match tokio::net::lookup_host((domain, port)).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if self.is_blocked(addr.ip()) {
                            return Err(Error::AddressBlocked(format!("{} resolves to {}", domain, addr.ip())));
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    debug!("Address check could not resolve {}: {}", domain, e);
                    Ok(())
                }
            },
            None => Ok(()),
        }
    }

    fn check_ip(&self, ip: IpAddr) -> Result<()> {
        if self.is_blocked(ip) {
            Err(Error::AddressBlocked(ip.to_string()))
        } else {
            Ok(())
        }
    }
}
