//! Utility functions for the proxy server

pub mod http;
pub mod logging;
pub mod time;
pub mod url;

pub use self::http::*;
pub use self::logging::*;
pub use self::time::*;
pub use self::url::*;
