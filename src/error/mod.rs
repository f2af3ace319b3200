//! Error handling module for the proxy server

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Every way a single forwarded request can fail
#[derive(Error, Debug)]
pub enum Error {
    #[error("No target URL specified")]
    NoTargetSpecified,

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Domain is blocked: {0}")]
    DomainBlocked(String),

    #[error("Target address is blocked: {0}")]
    AddressBlocked(String),

    #[error("Rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Request body exceeds {limit} bytes")]
    RequestTooLarge { limit: u64 },

    #[error("Method not supported by this proxy: {0}")]
    MethodNotSupported(String),

    #[error("Upstream request timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream TLS error: {0}")]
    UpstreamTls(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for the proxy server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status code returned to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoTargetSpecified | Error::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            Error::DomainBlocked(_) | Error::AddressBlocked(_) => StatusCode::FORBIDDEN,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::MethodNotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamUnreachable(_)
            | Error::UpstreamTls(_)
            | Error::Upstream(_)
            | Error::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,
            Error::Http(_) | Error::Serialization(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name, used in error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoTargetSpecified => "no_target_specified",
            Error::InvalidTarget(_) => "invalid_target",
            Error::DomainBlocked(_) => "domain_blocked",
            Error::AddressBlocked(_) => "address_blocked",
            Error::RateLimited { .. } => "rate_limited",
            Error::RequestTooLarge { .. } => "request_too_large",
            Error::MethodNotSupported(_) => "method_not_supported",
            Error::UpstreamTimeout(_) => "upstream_timeout",
            Error::UpstreamUnreachable(_) => "upstream_unreachable",
            Error::UpstreamTls(_) => "upstream_tls_error",
            Error::Upstream(_) => "upstream_error",
            Error::ResponseTooLarge { .. } => "response_too_large",
            Error::Http(_) | Error::Serialization(_) | Error::Config(_) => "internal_error",
        }
    }

    /// True for errors raised before any outbound call was attempted
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::NoTargetSpecified
                | Error::InvalidTarget(_)
                | Error::DomainBlocked(_)
                | Error::AddressBlocked(_)
                | Error::RateLimited { .. }
                | Error::RequestTooLarge { .. }
                | Error::MethodNotSupported(_)
        )
    }
}
