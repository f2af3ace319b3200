//! Server CLI arguments

use crate::config::{AuthConfig, LoadedConfig, ProxyConfig, UpstreamProxyConfig};
use anyhow::{anyhow, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::debug;

/// Flags override the config file, which overrides the environment-free defaults
#[derive(Debug, Default, Args)]
pub struct ServerArgs {
    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listening host
    #[arg(long)]
    pub host: Option<String>,

    /// Listening port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Outbound request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<String>,

    /// Enable per-client rate limiting
    #[arg(long)]
    pub rate_limit: bool,

    /// Requests per minute per client (implies --rate-limit)
    #[arg(long)]
    pub max_requests: Option<u32>,

    /// Verify TLS certificates of targets and upstream proxies
    #[arg(long)]
    pub verify_ssl: bool,

    /// Reject these target domains (and their subdomains)
    #[arg(long, num_args = 1..)]
    pub block_domains: Vec<String>,

    /// Only accept these target domains (and their subdomains)
    #[arg(long, num_args = 1..)]
    pub allow_domains: Vec<String>,

    /// Route all outbound requests through this proxy
    #[arg(long)]
    pub upstream_proxy: Option<String>,

    /// Basic credentials for outbound requests, as user:pass
    #[arg(long)]
    pub auth: Option<String>,
}

impl ServerArgs {
    /// Defaults, then the config file, then environment, then these flags
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let mut loaded = ProxyConfig::load(self.config.as_deref());
        self.apply_to(&mut loaded.config)?;
        Ok(loaded)
    }

    /// Apply the flags that were given on top of `config`
    pub fn apply_to(&self, config: &mut ProxyConfig) -> Result<()> {
        debug!("Applying CLI arguments to ProxyConfig");

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if self.rate_limit {
            config.rate_limit_enabled = true;
        }
        if let Some(max) = self.max_requests {
            config.rate_limit_enabled = true;
            config.requests_per_minute = max;
        }
        if self.verify_ssl {
            config.verify_ssl = true;
        }
        if !self.block_domains.is_empty() {
            config.blocked_domains.extend(self.block_domains.iter().cloned());
        }
        if !self.allow_domains.is_empty() {
            config.allowed_domains.extend(self.allow_domains.iter().cloned());
        }
        if let Some(upstream) = &self.upstream_proxy {
            config.upstream_proxy = Some(UpstreamProxyConfig {
                http: Some(upstream.clone()),
                https: Some(upstream.clone()),
            });
        }
        if let Some(auth) = &self.auth {
            config.auth = Some(parse_auth(auth)?);
        }

        Ok(())
    }
}

fn parse_auth(raw: &str) -> Result<AuthConfig> {
    match raw.split_once(':') {
        Some((username, password)) if !username.is_empty() => Ok(AuthConfig {
            username: username.to_string(),
            password: password.to_string(),
        }),
        _ => Err(anyhow!("Invalid --auth value, expected user:pass")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = ServerArgs {
            port: Some(9090),
            max_requests: Some(10),
            block_domains: vec!["bad.example".into()],
            upstream_proxy: Some("http://up:3128".into()),
            auth: Some("alice:s3:cret".into()),
            ..ServerArgs::default()
        };
        let mut config = ProxyConfig { blocked_domains: vec!["old.example".into()], ..ProxyConfig::default() };
        args.apply_to(&mut config).unwrap();

        assert_eq!(config.port, 9090);
        assert!(config.rate_limit_enabled);
        assert_eq!(config.requests_per_minute, 10);
        assert_eq!(config.blocked_domains.len(), 2);
        let upstream = config.upstream_proxy.unwrap();
        assert_eq!(upstream.http, upstream.https);
        let auth = config.auth.unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "s3:cret");
    }

    #[test]
    fn test_absent_flags_leave_config_alone() {
        let mut config = ProxyConfig { port: 7000, verify_ssl: true, ..ProxyConfig::default() };
        ServerArgs::default().apply_to(&mut config).unwrap();
        assert_eq!(config.port, 7000);
        assert!(config.verify_ssl);
    }

    #[test]
    fn test_bad_auth_flag() {
        let args = ServerArgs { auth: Some("no-colon".into()), ..ServerArgs::default() };
        assert!(args.apply_to(&mut ProxyConfig::default()).is_err());
    }
}
