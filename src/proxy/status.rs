//! Status and health reporting for the local `/proxy/*` endpoints

use crate::config::ProxyConfig;
use crate::proxy::metrics::ProxyMetrics;
use crate::utils::{format_uptime, now};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub const STATUS_PATH: &str = "/proxy/status";
pub const HEALTH_PATH: &str = "/proxy/health";

/// Configuration summary safe to expose: flags only, never endpoints or credentials
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub host: String,
    pub port: u16,
    pub upstream_proxy: bool,
    pub auth_enabled: bool,
    pub rate_limit_enabled: bool,
    pub verify_ssl: bool,
}

impl ConfigSummary {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            upstream_proxy: config.upstream_proxy.as_ref().map(|u| !u.is_empty()).unwrap_or(false),
            auth_enabled: config.auth.is_some(),
            rate_limit_enabled: config.rate_limit_enabled,
            verify_ssl: config.verify_ssl,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub started_at: DateTime<Utc>,
    pub requests_processed: u64,
    pub requests_rejected: u64,
    pub requests_failed: u64,
    pub config: ConfigSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub struct StatusReporter {
    metrics: Arc<ProxyMetrics>,
    summary: ConfigSummary,
}

impl StatusReporter {
    pub fn new(metrics: Arc<ProxyMetrics>, config: &ProxyConfig) -> Self {
        Self {
            metrics,
            summary: ConfigSummary::from_config(config),
        }
    }

    pub fn status(&self) -> StatusReport {
        let uptime = self.metrics.uptime();
        let counters = self.metrics.snapshot();
        StatusReport {
            status: "running",
            uptime_seconds: uptime.as_secs(),
            uptime_formatted: format_uptime(uptime),
            started_at: self.metrics.started_at(),
            requests_processed: counters.requests_processed,
            requests_rejected: counters.requests_rejected,
            requests_failed: counters.requests_failed,
            config: self.summary.clone(),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            timestamp: now(),
        }
    }
}
