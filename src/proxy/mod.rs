//! Proxy server module

pub mod core;
pub mod http_client;
pub mod metrics;
pub mod resolver;
pub mod sanitizer;
pub mod server;
pub mod status;
pub mod streaming;
pub mod upstream;

// Re-exports
pub use self::core::{Dispatcher, ForwardPipeline, Forwarded};
pub use http_client::HttpClient;
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use resolver::resolve_target;
pub use sanitizer::HeaderSanitizer;
pub use server::{handle_request, ProxyServer, ServerState};
pub use status::StatusReporter;
pub use streaming::ResponseAssembler;
pub use upstream::UpstreamSelector;
