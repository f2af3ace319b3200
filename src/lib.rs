//! ipmask-proxy - an anonymizing HTTP forward proxy
//!
//! Requests are stripped of client-identifying headers, optionally chained through a
//! second proxy, and relayed to their target with the response streamed back.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod utils;

// Re-export commonly used items
pub use config::ProxyConfig;
pub use error::{Error, Result};
pub use logging::{init_logger_with_config, init_logger_with_env, log_debug, log_error, log_info, log_trace, log_warning};
pub use models::{IncomingRequest, OutboundRequest, ProxyLog, ResolvedTarget, UpstreamResponse};
pub use proxy::{Dispatcher, ForwardPipeline, ProxyServer};

/// Runtime utilities
pub mod runtime {
    use anyhow::{Context, Result};
    use tokio::runtime::{Builder, Runtime};
    use tracing::info;

    /// Multi-threaded runtime; `None` or `0` worker threads means one per CPU core
    pub fn create_runtime(worker_threads: Option<usize>) -> Result<Runtime> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all();

        match worker_threads {
            Some(threads) if threads > 0 => {
                info!("🧵 Initializing multi-threaded runtime with {} worker threads", threads);
                builder.worker_threads(threads);
            }
            _ => info!("🧵 Initializing multi-threaded runtime with auto-detected CPU cores"),
        }

        builder.build().context("Failed to create multi-threaded runtime")
    }

    /// Run a future to completion on a runtime built from `worker_threads`
    pub fn run_with_runtime<F, T>(worker_threads: Option<usize>, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(worker_threads)?;
        runtime.block_on(future)
    }
}
