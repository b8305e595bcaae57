use std::time::Duration;

use clap::Args;

const HELP_HEADING: &str = "Scanner options";

/// Command line / environment form of [`ScannerConfig`](super::ScannerConfig).
#[derive(Args, Clone, PartialEq, Eq, Debug)]
pub struct CliScannerConfig {
    /// Requests allowed per rolling request window.
    #[arg(long, env = "SCANNER_RPC_LIMIT", help_heading = HELP_HEADING, default_value_t = super::RPC_LIMIT)]
    rpc_limit: usize,
    /// Length of the rolling request window in milliseconds.
    #[arg(long, env = "SCANNER_REQUEST_WINDOW_MS", help_heading = HELP_HEADING, default_value_t = 1000)]
    request_window_ms: u64,
    /// Attempts per RPC call, the first one included.
    #[arg(long, env = "SCANNER_MAX_RETRIES", help_heading = HELP_HEADING, default_value_t = super::MAX_RETRIES)]
    max_retries: u32,
    /// Backoff before the first retry in milliseconds. Doubles per attempt.
    #[arg(long, env = "SCANNER_INITIAL_BACKOFF_MS", help_heading = HELP_HEADING, default_value_t = 500)]
    initial_backoff_ms: u64,
    /// Upper bound of the retry backoff in milliseconds.
    #[arg(long, env = "SCANNER_MAX_BACKOFF_MS", help_heading = HELP_HEADING, default_value_t = 16_000)]
    max_backoff_ms: u64,
    /// Transactions per orchestration batch.
    #[arg(short, long, env = "SCANNER_BATCH_SIZE", help_heading = HELP_HEADING, default_value_t = super::BATCH_SIZE)]
    batch_size: usize,
    /// Batches of one block processed concurrently.
    #[arg(long, env = "SCANNER_MAX_CONCURRENT_BATCHES", help_heading = HELP_HEADING, default_value_t = super::MAX_CONCURRENT_BATCHES)]
    max_concurrent_batches: usize,
    /// Concurrent receipt fetches within one batch.
    #[arg(long, env = "SCANNER_RPC_BATCH_SIZE", help_heading = HELP_HEADING, default_value_t = super::RPC_BATCH_SIZE)]
    rpc_batch_size: usize,
    /// Capacity of the block cache.
    #[arg(long, env = "SCANNER_CACHE_SIZE", help_heading = HELP_HEADING, default_value_t = super::CACHE_SIZE)]
    cache_size: usize,
    /// HTTP requests in flight at once.
    #[arg(long, env = "SCANNER_MAX_PARALLEL_REQUESTS", help_heading = HELP_HEADING, default_value_t = crate::provider::MAX_PARALLEL_REQUESTS)]
    max_parallel_requests: usize,
    /// Chain head polling interval in milliseconds, used once caught up.
    #[arg(long, env = "SCANNER_POLL_INTERVAL_MS", help_heading = HELP_HEADING, default_value_t = 2000)]
    poll_interval_ms: u64,
    /// Seconds between progress reports in follow mode.
    #[arg(long, env = "SCANNER_REPORT_INTERVAL_SECS", help_heading = HELP_HEADING, default_value_t = 60)]
    report_interval_secs: u64,
    /// Heights fetched ahead of the block being processed.
    #[arg(long, env = "SCANNER_PREFETCH_DEPTH", help_heading = HELP_HEADING, default_value_t = 2)]
    prefetch_depth: u64,
    /// Blocks processed at once in range mode.
    #[arg(long, env = "SCANNER_BLOCK_CONCURRENCY", help_heading = HELP_HEADING, default_value_t = 4)]
    block_concurrency: usize,
    /// Skip heights the output already marks as ingested.
    #[arg(long, env = "SCANNER_SKIP_INGESTED", help_heading = HELP_HEADING, default_value_t = false)]
    skip_ingested: bool,
}

impl From<CliScannerConfig> for super::ScannerConfig {
    fn from(cli: CliScannerConfig) -> Self {
        Self {
            rpc_limit: cli.rpc_limit,
            request_window: Duration::from_millis(cli.request_window_ms),
            max_retries: cli.max_retries,
            initial_backoff: Duration::from_millis(cli.initial_backoff_ms),
            max_backoff: Duration::from_millis(cli.max_backoff_ms),
            batch_size: cli.batch_size,
            max_concurrent_batches: cli.max_concurrent_batches,
            rpc_batch_size: cli.rpc_batch_size,
            cache_size: cli.cache_size,
            max_parallel_requests: cli.max_parallel_requests,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            report_interval: Duration::from_secs(cli.report_interval_secs),
            prefetch_depth: cli.prefetch_depth,
            block_concurrency: cli.block_concurrency,
            skip_ingested: cli.skip_ingested,
            session_timeout: None,
        }
    }
}
