use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use tracing::{debug, error, warn};

use crate::error::RpcError;
use crate::governor::RequestGovernor;
use crate::metrics::Metrics;
use crate::provider::ChainClient;
use crate::types::{Block, Receipt};

/// Exponential backoff over a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Duration,
    max_backoff: Duration,
    attempts: u32,
    max_attempts: u32,
}

impl RetryPolicy {
    /// `max_attempts` counts every call, the first one included.
    pub fn new(initial_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: initial_backoff.min(max_backoff),
            max_backoff,
            attempts: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the next attempt.
    pub fn next_backoff(&self) -> Duration {
        self.backoff
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> tokio::time::Sleep {
        tokio::time::sleep(self.backoff)
    }

    /// Decides whether the outcome of the last attempt deserves another one.
    /// The returned future sleeps for the backoff and yields the policy for
    /// the following attempt.
    pub fn retry<T>(
        &self,
        result: Result<&T, &RpcError>,
    ) -> Option<impl Future<Output = Self> + Send> {
        match result {
            Err(e) if e.is_retryable() && self.attempts < self.max_attempts => {
                let mut policy = self.clone();
                Some(async move {
                    policy.backoff().await;
                    policy.attempts += 1;
                    policy.backoff = (policy.backoff * 2).min(policy.max_backoff);
                    policy
                })
            }
            _ => None,
        }
    }
}

/// Wraps a [`ChainClient`] so that every request passes the
/// [`RequestGovernor`] and retryable failures are retried with backoff.
///
/// Failures are returned, never panicked on; callers treat them as "this
/// element is unavailable".
pub struct RetryingClient<C> {
    inner: Arc<C>,
    governor: Arc<RequestGovernor>,
    metrics: Arc<Metrics>,
    policy: RetryPolicy,
}

impl<C: ChainClient> RetryingClient<C> {
    pub fn new(
        inner: Arc<C>,
        governor: Arc<RequestGovernor>,
        metrics: Arc<Metrics>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            governor,
            metrics,
            policy,
        }
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    /// Runs `op` until it succeeds, fails fatally, or runs out of attempts.
    pub async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RpcError>> + Send,
        T: Send,
    {
        let mut policy = self.policy.clone();
        let mut res = self.attempt(&op).await;

        while let Some(next) = policy.retry(res.as_ref()) {
            if let Err(e) = &res {
                warn!(
                    operation,
                    attempt = policy.attempts(),
                    backoff_ms = policy.next_backoff().as_millis() as u64,
                    "retrying after error: {e}"
                );
            }
            policy = next.await;
            res = self.attempt(&op).await;
        }

        match res {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                error!(
                    operation,
                    attempts = policy.attempts(),
                    "retries exhausted: {e}"
                );
                Err(RpcError::Exhausted {
                    attempts: policy.attempts(),
                    last: Box::new(e),
                })
            }
            Err(e) => {
                debug!(operation, "not retrying: {e}");
                Err(e)
            }
        }
    }

    /// One governed attempt without retries, for best-effort calls.
    pub async fn call_once<T, F, Fut>(&self, op: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        self.attempt(&op).await
    }

    async fn attempt<T, F, Fut>(&self, op: &F) -> Result<T, RpcError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        self.governor.admit().await;
        self.metrics.record_rpc_request();
        let res = op(self.inner.clone()).await;
        if res.is_err() {
            self.metrics.record_rpc_error();
        }
        res
    }
}

impl<C: ChainClient> ChainClient for RetryingClient<C> {
    async fn get_block(&self, number: u64) -> Result<Block, RpcError> {
        self.call("eth_getBlockByNumber", move |client| async move {
            client.get_block(number).await
        })
        .await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Receipt, RpcError> {
        self.call("eth_getTransactionReceipt", move |client| async move {
            client.get_transaction_receipt(hash).await
        })
        .await
    }

    async fn get_chain_head(&self) -> Result<u64, RpcError> {
        self.call("eth_blockNumber", |client| async move {
            client.get_chain_head().await
        })
        .await
    }
}
