pub mod block_interval;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod governor;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod scan;
pub mod session;
pub mod storage;
pub mod tracing;
pub mod types;

/// Common information for the `--version` CLI flags.
pub fn version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
