//! Session counters and the report rendered from them.
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters of one scanning session. Reset at scan start, only ever
/// incremented while running, read at report time.
#[derive(Debug, Default)]
pub struct Metrics {
    blocks_processed: AtomicU64,
    contracts_found: AtomicU64,
    transactions_processed: AtomicU64,
    candidates: AtomicU64,
    rpc_requests: AtomicU64,
    rpc_errors: AtomicU64,
    receipt_failures: AtomicU64,
    duplicate_batches: AtomicU64,
    store_failures: AtomicU64,
    progress_reports: AtomicU64,
    batches_in_flight: AtomicUsize,
    peak_batches_in_flight: AtomicUsize,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub blocks_processed: u64,
    pub contracts_found: u64,
    pub transactions_processed: u64,
    pub candidates: u64,
    pub rpc_requests: u64,
    pub rpc_errors: u64,
    pub receipt_failures: u64,
    pub duplicate_batches: u64,
    pub store_failures: u64,
    pub progress_reports: u64,
    pub peak_batches_in_flight: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        for counter in [
            &self.blocks_processed,
            &self.contracts_found,
            &self.transactions_processed,
            &self.candidates,
            &self.rpc_requests,
            &self.rpc_errors,
            &self.receipt_failures,
            &self.duplicate_batches,
            &self.store_failures,
            &self.progress_reports,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.batches_in_flight.store(0, Ordering::Relaxed);
        self.peak_batches_in_flight.store(0, Ordering::Relaxed);
    }

    pub fn record_rpc_request(&self) {
        self.rpc_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_error(&self) {
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self, transactions: usize) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.transactions_processed
            .fetch_add(transactions as u64, Ordering::Relaxed);
    }

    pub fn record_candidates(&self, count: usize) {
        self.candidates.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_contracts(&self, count: usize) {
        self.contracts_found
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_receipt_failure(&self) {
        self.receipt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_batch(&self) {
        self.duplicate_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_progress_report(&self) {
        self.progress_reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a batch as running and returns a guard that unmarks it on drop.
    pub fn batch_started(&self) -> BatchGauge<'_> {
        let now = self.batches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_batches_in_flight
            .fetch_max(now, Ordering::SeqCst);
        BatchGauge { metrics: self }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            contracts_found: self.contracts_found.load(Ordering::Relaxed),
            transactions_processed: self.transactions_processed.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            rpc_requests: self.rpc_requests.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
            receipt_failures: self.receipt_failures.load(Ordering::Relaxed),
            duplicate_batches: self.duplicate_batches.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            progress_reports: self.progress_reports.load(Ordering::Relaxed),
            peak_batches_in_flight: self.peak_batches_in_flight.load(Ordering::SeqCst),
        }
    }
}

pub struct BatchGauge<'a> {
    metrics: &'a Metrics,
}

impl Drop for BatchGauge<'_> {
    fn drop(&mut self) {
        self.metrics
            .batches_in_flight
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum Termination {
    /// A bounded interval was fully processed.
    Completed,
    /// The shutdown signal fired.
    Signal,
    /// The session time budget ran out.
    TimeBudget,
    /// A session-critical call failed for good.
    Failed(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::Signal => write!(f, "shutdown signal"),
            Termination::TimeBudget => write!(f, "time budget exhausted"),
            Termination::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Final (or periodic) summary of a session.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub duration_secs: f64,
    pub blocks_per_sec: f64,
    pub contracts_per_sec: f64,
    /// Share of RPC requests that did not error, in `[0, 1]`.
    pub rpc_success_rate: f64,
    pub last_block: Option<u64>,
    pub chain_head: Option<u64>,
    /// How far `last_block` trails `chain_head`.
    pub block_gap: Option<u64>,
    pub termination: Option<Termination>,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

impl ScanReport {
    pub fn new(
        counters: MetricsSnapshot,
        elapsed: Duration,
        last_block: Option<u64>,
        chain_head: Option<u64>,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let per_sec = |n: u64| if secs > 0.0 { n as f64 / secs } else { 0.0 };
        let rpc_success_rate = if counters.rpc_requests == 0 {
            1.0
        } else {
            counters.rpc_requests.saturating_sub(counters.rpc_errors) as f64
                / counters.rpc_requests as f64
        };
        let block_gap = match (last_block, chain_head) {
            (Some(last), Some(head)) => Some(head.saturating_sub(last)),
            _ => None,
        };

        Self {
            duration_secs: secs,
            blocks_per_sec: per_sec(counters.blocks_processed),
            contracts_per_sec: per_sec(counters.contracts_found),
            rpc_success_rate,
            last_block,
            chain_head,
            block_gap,
            termination: None,
            counters,
        }
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = Some(termination);
        self
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks, {} txs, {} new contracts in {:.1}s ({:.2} blocks/s, {:.3} contracts/s); \
             rpc requests {}, rpc errors {} (success {:.1}%)",
            self.counters.blocks_processed,
            self.counters.transactions_processed,
            self.counters.contracts_found,
            self.duration_secs,
            self.blocks_per_sec,
            self.contracts_per_sec,
            self.counters.rpc_requests,
            self.counters.rpc_errors,
            self.rpc_success_rate * 100.0,
        )?;
        if let Some(gap) = self.block_gap {
            write!(f, "; {gap} blocks behind head")?;
        }
        Ok(())
    }
}
