pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod server;
pub mod sse;
