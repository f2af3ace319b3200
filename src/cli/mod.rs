//! Command-line interface for running the proxy and managing its configuration

pub mod config;
pub mod server;

pub use config::*;
pub use server::*;
