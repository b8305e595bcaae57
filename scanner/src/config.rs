pub mod cli;

use std::io;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::warn;
use url::Url;

use crate::error::ConfigError;

pub const RPC_LIMIT: usize = 25;
pub const REQUEST_WINDOW: Duration = Duration::from_secs(1);
pub const MAX_RETRIES: u32 = 5;
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const MAX_BACKOFF: Duration = Duration::from_secs(16);
pub const BATCH_SIZE: usize = 50;
pub const MAX_CONCURRENT_BATCHES: usize = 4;
pub const RPC_BATCH_SIZE: usize = 10;
pub const CACHE_SIZE: usize = 20;

const ALCHEMY_MAINNET_URL: &str = "https://eth-mainnet.g.alchemy.com/v2/";

/// Tuning of one scanning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Requests allowed per `request_window`.
    pub rpc_limit: usize,
    pub request_window: Duration,
    /// Attempts per RPC call, the first one included.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Transactions per orchestration batch.
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    /// Concurrent receipt fetches inside one batch.
    pub rpc_batch_size: usize,
    pub cache_size: usize,
    /// HTTP requests in flight at once.
    pub max_parallel_requests: usize,
    /// Delay between chain head polls when caught up.
    pub poll_interval: Duration,
    /// Period of progress reports in continuous mode.
    pub report_interval: Duration,
    /// Heights fetched ahead of the one being processed.
    pub prefetch_depth: u64,
    /// Blocks processed at once in bounded-range mode.
    pub block_concurrency: usize,
    /// Skip heights the sink reports as already ingested.
    pub skip_ingested: bool,
    /// Hard stop for continuous mode.
    pub session_timeout: Option<Duration>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            rpc_limit: RPC_LIMIT,
            request_window: REQUEST_WINDOW,
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            batch_size: BATCH_SIZE,
            max_concurrent_batches: MAX_CONCURRENT_BATCHES,
            rpc_batch_size: RPC_BATCH_SIZE,
            cache_size: CACHE_SIZE,
            max_parallel_requests: crate::provider::MAX_PARALLEL_REQUESTS,
            poll_interval: Duration::from_millis(2000),
            report_interval: Duration::from_secs(60),
            prefetch_depth: 2,
            block_concurrency: 4,
            skip_ingested: false,
            session_timeout: None,
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("rpc-limit", self.rpc_limit),
            ("max-retries", self.max_retries as usize),
            ("batch-size", self.batch_size),
            ("max-concurrent-batches", self.max_concurrent_batches),
            ("rpc-batch-size", self.rpc_batch_size),
            ("cache-size", self.cache_size),
            ("max-parallel-requests", self.max_parallel_requests),
            ("block-concurrency", self.block_concurrency),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }
        let non_zero_durations = [
            ("request-window-ms", self.request_window),
            ("poll-interval-ms", self.poll_interval),
            ("report-interval-secs", self.report_interval),
        ];
        if let Some((name, _)) = non_zero_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Zero(*name));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::BackoffOrder {
                initial_ms: self.initial_backoff.as_millis(),
                max_ms: self.max_backoff.as_millis(),
            });
        }
        Ok(())
    }
}

/// Picks the RPC endpoint: an explicit URL wins, otherwise an Alchemy API key
/// selects the Alchemy mainnet endpoint.
pub fn resolve_endpoint(
    rpc_url: Option<Url>,
    alchemy_api_key: Option<&str>,
) -> Result<Url, ConfigError> {
    if let Some(url) = rpc_url {
        return Ok(url);
    }
    match alchemy_api_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => {
            let raw = format!("{ALCHEMY_MAINNET_URL}{key}");
            Url::parse(&raw).map_err(|_| ConfigError::InvalidEndpoint(raw))
        }
        None => Err(ConfigError::MissingEndpoint),
    }
}

/// Loads a local `.env` into the process environment if there is one.
///
/// A missing or unreadable file is not an error; a file that exists but
/// does not parse is reported and otherwise ignored.
pub fn load_dotenvy_vars_if_present() {
    match dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(io::Error { .. })) => (),
        Err(e) => warn!("found a local `.env` file but could not parse it: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(ScannerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = ScannerConfig {
            max_concurrent_batches: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("max-concurrent-batches"))
        );
    }

    #[test]
    fn rejects_inverted_backoff() {
        let config = ScannerConfig {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackoffOrder { .. })
        ));
    }

    #[test]
    fn endpoint_resolution() {
        let explicit = Url::parse("http://localhost:8545").unwrap();
        assert_eq!(
            resolve_endpoint(Some(explicit.clone()), Some("key")),
            Ok(explicit)
        );
        assert_eq!(
            resolve_endpoint(None, Some("abc123")).unwrap().as_str(),
            "https://eth-mainnet.g.alchemy.com/v2/abc123"
        );
        assert_eq!(
            resolve_endpoint(None, Some("  ")),
            Err(ConfigError::MissingEndpoint)
        );
        assert_eq!(resolve_endpoint(None, None), Err(ConfigError::MissingEndpoint));
    }
}
