//! Admission control for forwarded requests

pub mod address_filter;
pub mod domain_filter;
pub mod rate_limit;

pub use address_filter::AddressPolicy;
pub use domain_filter::DomainPolicy;
pub use rate_limit::{RateLimit, RateLimiter};

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::models::ResolvedTarget;
use crate::proxy::metrics::ProxyMetrics;
use std::net::IpAddr;
use std::sync::Arc;

/// The gate every request passes before dispatch.
///
/// Checks run cheapest first: domain policy, rate limit, then the address policy,
/// which may need a DNS lookup. Every decision bumps exactly one of the processed or
/// rejected counters.
pub struct AdmissionController {
    domains: DomainPolicy,
    addresses: AddressPolicy,
    rate_limiter: Option<RateLimiter>,
    metrics: Arc<ProxyMetrics>,
}

impl AdmissionController {
    pub fn new(
        domains: DomainPolicy,
        addresses: AddressPolicy,
        rate_limiter: Option<RateLimiter>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            domains,
            addresses,
            rate_limiter,
            metrics,
        }
    }

    pub fn from_config(config: &ProxyConfig, metrics: Arc<ProxyMetrics>) -> Self {
        let rate_limiter = config
            .rate_limit_enabled
            .then(|| RateLimiter::per_minute(config.requests_per_minute, config.requests_per_hour));

        Self::new(
            DomainPolicy::new(&config.allowed_domains, &config.blocked_domains),
            AddressPolicy::new(config.blocked_networks()),
            rate_limiter,
            metrics,
        )
    }

    /// Accept the request or return the rejection reason
    pub async fn admit(&self, client: IpAddr, target: &ResolvedTarget) -> Result<()> {
        let decision = self.evaluate(client, target).await;
        match &decision {
            Ok(()) => self.metrics.record_processed(),
            Err(_) => self.metrics.record_rejected(),
        }
        decision
    }

    async fn evaluate(&self, client: IpAddr, target: &ResolvedTarget) -> Result<()> {
        self.domains.check(target.host())?;
        if let Some(limiter) = &self.rate_limiter {
            limiter.check(client)?;
        }
        self.addresses.check(&target.url).await
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::TargetSource;
    use url::Url;

    fn target(url: &str) -> ResolvedTarget {
        ResolvedTarget {
            url: Url::parse(url).unwrap(),
            source: TargetSource::QueryParam,
        }
    }

    #[tokio::test]
    async fn test_each_decision_counted_once() {
        let metrics = Arc::new(ProxyMetrics::new());
        let config = ProxyConfig {
            blocked_domains: vec!["bad.example".into()],
            rate_limit_enabled: true,
            requests_per_minute: 1,
            ..ProxyConfig::default()
        };
        let admission = AdmissionController::from_config(&config, Arc::clone(&metrics));
        let client: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(admission.admit(client, &target("http://good.example/")).await.is_ok());
        assert!(matches!(
            admission.admit(client, &target("http://good.example/")).await,
            Err(Error::RateLimited { .. })
        ));
        assert!(matches!(
            admission.admit(client, &target("http://bad.example/")).await,
            Err(Error::DomainBlocked(_))
        ));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_processed, 1);
        assert_eq!(snapshot.requests_rejected, 2);
    }

    #[tokio::test]
    async fn test_blocked_network() {
        let metrics = Arc::new(ProxyMetrics::new());
        let config = ProxyConfig {
            blocked_networks: vec!["192.168.0.0/16".into()],
            ..ProxyConfig::default()
        };
        let admission = AdmissionController::from_config(&config, metrics);
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(matches!(
            admission.admit(client, &target("http://192.168.1.1/router")).await,
            Err(Error::AddressBlocked(_))
        ));
        assert!(admission.rate_limiter().is_none());
    }
}
