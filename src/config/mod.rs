//! Configuration loading and defaults

pub mod settings;

pub use settings::{
    AuthConfig, HttpClientConfig, LoadedConfig, LoggingConfig, ProxyConfig, UpstreamProxyConfig,
    DEFAULT_CONFIG_PATH,
};
