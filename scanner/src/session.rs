use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::BlockCache;
use crate::config::ScannerConfig;
use crate::governor::RequestGovernor;
use crate::metrics::Metrics;
use crate::provider::ChainClient;
use crate::retry::{RetryPolicy, RetryingClient};

/// State shared by the tasks of one scanning session. Independent sessions
/// never share state.
pub struct ScanSession<C> {
    pub config: ScannerConfig,
    pub metrics: Arc<Metrics>,
    pub client: Arc<RetryingClient<C>>,
    pub cache: BlockCache<RetryingClient<C>>,
}

impl<C: ChainClient> ScanSession<C> {
    pub fn new(client: C, config: ScannerConfig) -> Self {
        let governor = Arc::new(RequestGovernor::new(
            config.rpc_limit,
            config.request_window,
        ));
        let metrics = Arc::new(Metrics::new());
        let client = Arc::new(RetryingClient::new(
            Arc::new(client),
            governor,
            metrics.clone(),
            RetryPolicy::new(
                config.initial_backoff,
                config.max_backoff,
                config.max_retries,
            ),
        ));
        let cache = BlockCache::new(client.clone(), config.cache_size);

        Self {
            config,
            metrics,
            client,
            cache,
        }
    }
}

/// Cooperative stop request, observed between block iterations.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

/// Fires the paired [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx: Some(rx) })
    }

    /// A signal that never fires.
    pub fn never() -> Shutdown {
        Shutdown { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the trigger fires. A dropped trigger never fires.
    pub async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|stop| *stop).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}
