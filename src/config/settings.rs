//! Proxy server configuration settings

use anyhow::{anyhow, Context, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default configuration file looked up when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];

/// Content codings the outbound client can decode
const DECODABLE_ENCODINGS: &[&str] = &["gzip", "x-gzip", "deflate", "br", "identity", "*"];

/// Main configuration for the proxy server
///
/// Every field has a default, so a partial file (or none at all) is always usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listening host
    pub host: String,

    /// Listening port
    pub port: u16,

    /// Outbound request timeout in seconds, covering the full request/response cycle
    pub timeout: u64,

    /// Outbound connection establishment timeout in seconds
    pub connect_timeout: u64,

    /// Verify TLS certificates of targets and upstream proxies.
    /// Off by default so self-signed test targets work; this is a security trade-off.
    pub verify_ssl: bool,

    /// Upstream proxy per target scheme
    pub upstream_proxy: Option<UpstreamProxyConfig>,

    /// Basic credentials attached to outbound requests
    pub auth: Option<AuthConfig>,

    /// Enable per-client rate limiting
    pub rate_limit_enabled: bool,

    /// Requests allowed per client per minute
    pub requests_per_minute: u32,

    /// Optional requests allowed per client per hour
    pub requests_per_hour: Option<u32>,

    /// Legacy nested block: `rate_limit: { enabled, requests_per_minute }`
    #[serde(skip_serializing)]
    pub rate_limit: Option<LegacyRateLimit>,

    /// Target hosts that are always rejected (exact or subdomain match)
    pub blocked_domains: Vec<String>,

    /// When non-empty, only these target hosts are accepted (exact or subdomain match)
    pub allowed_domains: Vec<String>,

    /// Target address ranges that are rejected, in CIDR or plain IP notation
    pub blocked_networks: Vec<String>,

    /// Headers added to every outbound request, overriding client values
    pub add_headers: BTreeMap<String, String>,

    /// Extra request headers removed on top of the built-in identity-leaking set
    pub remove_headers: Vec<String>,

    /// User-Agent pool
    pub user_agents: Vec<String>,

    /// Replace every client User-Agent with a random pool entry
    pub rotate_user_agent: bool,

    /// Maximum request body size in bytes
    pub max_content_length: u64,

    /// Maximum relayed response body size in bytes (unlimited when absent)
    pub max_response_size: Option<u64>,

    /// Value of the `X-Proxied-By` response header
    pub proxy_ident: String,

    /// Log level configuration
    pub log_level: String,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Outbound connection pool configuration
    pub http_client: HttpClientConfig,

    /// Tokio worker threads (None or 0 = CPU count)
    pub worker_threads: Option<usize>,
}

/// Upstream proxy endpoints keyed by target scheme
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl UpstreamProxyConfig {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

/// Credentials for outbound basic authentication
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyRateLimit {
    pub enabled: Option<bool>,
    pub requests_per_minute: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to this file
    pub file: Option<String>,

    /// Log one line per forwarded request at info level
    pub log_requests: bool,
}

/// Outbound connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Enable TCP keepalive
    pub tcp_keepalive: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut add_headers = BTreeMap::new();
        add_headers.insert("Accept-Encoding".to_string(), "gzip, deflate".to_string());
        add_headers.insert("Cache-Control".to_string(), "no-cache".to_string());

        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            timeout: 30,
            connect_timeout: 10,
            verify_ssl: false,
            upstream_proxy: None,
            auth: None,
            rate_limit_enabled: false,
            requests_per_minute: 60,
            requests_per_hour: None,
            rate_limit: None,
            blocked_domains: Vec::new(),
            allowed_domains: Vec::new(),
            blocked_networks: Vec::new(),
            add_headers,
            remove_headers: Vec::new(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            rotate_user_agent: false,
            max_content_length: 50 * 1024 * 1024, // 50MB
            max_response_size: None,
            proxy_ident: format!("ipmask-proxy/{}", env!("CARGO_PKG_VERSION")),
            log_level: "info".to_string(),
            logging: LoggingConfig::default(),
            http_client: HttpClientConfig::default(),
            worker_threads: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            log_requests: true,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 50,
            idle_timeout_secs: 90,
            tcp_keepalive: true,
            tcp_keepalive_interval_secs: 30,
        }
    }
}

/// A configuration together with the non-fatal problems found while building it
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ProxyConfig,
    pub warnings: Vec<String>,
}

impl ProxyConfig {
    /// Parse a configuration file strictly enough to report a broken file.
    ///
    /// The document must be a mapping; individual keys with bad values are skipped
    /// and reported in the returned warnings.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<LoadedConfig> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let document: Value = if is_json {
            let json: serde_json::Value = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            serde_yaml::to_value(json)?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        };

        if document.is_null() {
            return Ok(LoadedConfig { config: Self::default(), warnings: Vec::new() });
        }

        let (mut config, warnings) = Self::default().merge(document)?;
        config.normalize();
        Ok(LoadedConfig { config, warnings })
    }

    /// Load configuration the forgiving way: file (if any) over defaults, then
    /// environment overrides. Never fails; every problem becomes a warning.
    pub fn load(path: Option<&Path>) -> LoadedConfig {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false),
        };

        let mut loaded = if path.exists() {
            match Self::from_file(&path) {
                Ok(loaded) => loaded,
                Err(e) => LoadedConfig {
                    config: Self::default(),
                    warnings: vec![format!("{:#}; using defaults", e)],
                },
            }
        } else {
            let warnings = if explicit {
                vec![format!("Config file '{}' not found; using defaults", path.display())]
            } else {
                Vec::new()
            };
            LoadedConfig { config: Self::default(), warnings }
        };

        let env_warnings = loaded.config.apply_env_overrides();
        loaded.warnings.extend(env_warnings);
        loaded
    }

    /// Overlay a document on this configuration one top-level key at a time.
    /// Keys whose value does not fit the typed field are skipped with a warning.
    pub fn merge(&self, overlay: Value) -> Result<(ProxyConfig, Vec<String>)> {
        let overlay = match overlay {
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(anyhow!(
                    "Configuration must be a mapping, found {}",
                    value_type_name(&other)
                ))
            }
        };

        let mut merged = match serde_yaml::to_value(self)? {
            Value::Mapping(mapping) => mapping,
            _ => Mapping::new(),
        };
        let mut current = self.clone();
        let mut warnings = Vec::new();

        for (key, value) in overlay {
            let mut candidate = merged.clone();
            candidate.insert(key.clone(), value);
            match serde_yaml::from_value::<ProxyConfig>(Value::Mapping(candidate.clone())) {
                Ok(config) => {
                    merged = candidate;
                    current = config;
                }
                Err(e) => {
                    let name = key.as_str().unwrap_or("<non-string key>");
                    warnings.push(format!("Ignoring invalid value for '{}': {}", name, e));
                }
            }
        }

        Ok((current, warnings))
    }

    /// Fold the legacy nested rate limit block into the flat fields
    pub fn normalize(&mut self) {
        if let Some(legacy) = self.rate_limit.take() {
            if let Some(enabled) = legacy.enabled {
                self.rate_limit_enabled = enabled;
            }
            if let Some(rpm) = legacy.requests_per_minute {
                self.requests_per_minute = rpm;
            }
        }
        if self.upstream_proxy.as_ref().map(|u| u.is_empty()).unwrap_or(false) {
            self.upstream_proxy = None;
        }
    }

    /// Apply `PROXY_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; returns warnings for unusable values
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(host) = lookup("PROXY_HOST") {
            self.host = host;
        }
        override_parsed(&lookup, "PROXY_PORT", &mut self.port, &mut warnings);
        override_parsed(&lookup, "PROXY_TIMEOUT", &mut self.timeout, &mut warnings);
        override_parsed(&lookup, "PROXY_MAX_CONTENT_LENGTH", &mut self.max_content_length, &mut warnings);
        if let Some(level) = lookup("PROXY_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(file) = lookup("PROXY_LOG_FILE") {
            self.logging.file = if file.is_empty() { None } else { Some(file) };
        }
        override_flag(&lookup, "PROXY_VERIFY_SSL", &mut self.verify_ssl, &mut warnings);
        override_flag(&lookup, "PROXY_RATE_LIMIT_ENABLED", &mut self.rate_limit_enabled, &mut warnings);
        override_parsed(&lookup, "PROXY_REQUESTS_PER_MINUTE", &mut self.requests_per_minute, &mut warnings);

        let upstream_http = lookup("PROXY_UPSTREAM_HTTP");
        let upstream_https = lookup("PROXY_UPSTREAM_HTTPS");
        if upstream_http.is_some() || upstream_https.is_some() {
            let upstream = self.upstream_proxy.get_or_insert_with(UpstreamProxyConfig::default);
            if upstream_http.is_some() {
                upstream.http = upstream_http;
            }
            if upstream_https.is_some() {
                upstream.https = upstream_https;
            }
        }

        match (lookup("PROXY_AUTH_USERNAME"), lookup("PROXY_AUTH_PASSWORD")) {
            (Some(username), Some(password)) => {
                self.auth = Some(AuthConfig { username, password });
            }
            (Some(_), None) | (None, Some(_)) => {
                warnings.push(
                    "PROXY_AUTH_USERNAME and PROXY_AUTH_PASSWORD must be set together; ignoring".to_string(),
                );
            }
            (None, None) => {}
        }

        warnings
    }

    /// Report configuration problems without refusing to start
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Invalid port number: 0".to_string());
        }
        if self.timeout == 0 {
            errors.push("Timeout must be positive: 0".to_string());
        }
        if self.rate_limit_enabled {
            if self.requests_per_minute == 0 {
                errors.push("Requests per minute must be positive: 0".to_string());
            }
            if self.requests_per_hour == Some(0) {
                errors.push("Requests per hour must be positive: 0".to_string());
            }
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(format!("Invalid log level: {}", self.log_level));
        }
        for entry in &self.blocked_networks {
            if parse_network(entry).is_none() {
                errors.push(format!("Invalid blocked network: {}", entry));
            }
        }
        if let Some(upstream) = &self.upstream_proxy {
            for (scheme, endpoint) in [("http", &upstream.http), ("https", &upstream.https)] {
                if let Some(endpoint) = endpoint {
                    if Url::parse(endpoint).is_err() {
                        errors.push(format!(
                            "Invalid upstream proxy for {}: {}",
                            scheme,
                            crate::utils::redact_credentials(endpoint)
                        ));
                    }
                }
            }
        }
        for (name, value) in &self.add_headers {
            if !name.trim().eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            for coding in value.split(',') {
                // Drop any `;q=` weight
                let coding = coding.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
                if !coding.is_empty() && !DECODABLE_ENCODINGS.contains(&coding.as_str()) {
                    errors.push(format!("Accept-Encoding advertises {}, which responses cannot be decoded from", coding));
                }
            }
        }
        if self.rotate_user_agent && self.user_agents.is_empty() {
            errors.push("User-Agent rotation enabled with an empty user_agents pool".to_string());
        }

        errors
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))?
            .next()
            .ok_or_else(|| anyhow!("Listen address {}:{} did not resolve", self.host, self.port))
    }

    /// Outbound request timeout
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Parsed `blocked_networks`; invalid entries are skipped (and reported by `validate`)
    pub fn blocked_networks(&self) -> Vec<IpNet> {
        self.blocked_networks.iter().filter_map(|entry| parse_network(entry)).collect()
    }

    /// A sample configuration suitable for writing to disk
    pub fn sample() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            rate_limit_enabled: true,
            requests_per_minute: 120,
            logging: LoggingConfig {
                file: Some("proxy.log".to_string()),
                log_requests: true,
            },
            ..Self::default()
        }
    }

    /// Serialize as JSON or YAML depending on the path extension
    pub fn to_file_string(&self, path: &Path) -> Result<String> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Ok(serde_json::to_string_pretty(self)?)
        } else {
            Ok(serde_yaml::to_string(self)?)
        }
    }
}

/// Parse `10.0.0.0/8` or a bare address (treated as a single-host network)
pub fn parse_network(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<std::net::IpAddr>().ok().map(IpNet::from))
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T, warnings: &mut Vec<String>)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warnings.push(format!("Invalid value for {}: {}", key, raw)),
        }
    }
}

fn override_flag<F>(lookup: &F, key: &str, target: &mut bool, warnings: &mut Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => *target = true,
            "false" | "0" | "no" => *target = false,
            _ => warnings.push(format!("Invalid value for {}: {}", key, raw)),
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
