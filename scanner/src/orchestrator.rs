//! Per-block processing of candidate transactions.
//!
//! Batches run concurrently, bounded by a semaphore shared by every block this
//! orchestrator handles. All batches of a block finish before its records are
//! handed to the sink in a single call.
use std::sync::Arc;

use alloy::primitives::B256;
use futures::stream::{self, FuturesUnordered};
use futures::StreamExt as _;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::detector;
use crate::error::RpcError;
use crate::provider::ChainClient;
use crate::session::ScanSession;
use crate::storage::{StorageSink, StoreOutcome};
use crate::types::{Block, ContractCreationRecord, Transaction};

pub struct BatchOrchestrator<C, S> {
    session: Arc<ScanSession<C>>,
    sink: Arc<S>,
    batch_permits: Semaphore,
}

impl<C, S> BatchOrchestrator<C, S>
where
    C: ChainClient,
    S: StorageSink,
{
    pub fn new(session: Arc<ScanSession<C>>, sink: Arc<S>) -> Self {
        let batch_permits = Semaphore::new(session.config.max_concurrent_batches);
        Self {
            session,
            sink,
            batch_permits,
        }
    }

    pub fn session(&self) -> &Arc<ScanSession<C>> {
        &self.session
    }

    /// Processes one height and returns how many new records were stored.
    ///
    /// Only a failure to fetch the block itself is returned as an error.
    /// Receipt and storage failures are logged and counted, never returned.
    pub async fn process_block(&self, number: u64) -> Result<usize, RpcError> {
        self.process_block_with_prefetch(number, []).await
    }

    /// Like [`Self::process_block`], warming the cache with `ahead` while the
    /// block itself is fetched.
    pub async fn process_block_with_prefetch(
        &self,
        number: u64,
        ahead: impl IntoIterator<Item = u64>,
    ) -> Result<usize, RpcError> {
        if self.session.config.skip_ingested {
            match self.sink.block_exists(number).await {
                Ok(true) => {
                    debug!(block = number, "already ingested, skipping");
                    return Ok(0);
                }
                Ok(false) => {}
                Err(e) => warn!(block = number, "could not check ingestion state: {e}"),
            }
        }

        let cache = &self.session.cache;
        let prefetch = futures::future::join_all(ahead.into_iter().map(|n| cache.prefetch(n)));
        let (block, _) = tokio::join!(cache.get_or_fetch(number), prefetch);
        let block = block.inspect_err(|e| error!(block = number, "could not fetch block: {e}"))?;

        let stored = self.process_fetched(&block).await;
        self.session
            .metrics
            .record_block(block.transactions.len());
        Ok(stored)
    }

    async fn process_fetched(&self, block: &Block) -> usize {
        let metrics = &self.session.metrics;
        let candidates = block
            .transactions
            .iter()
            .filter(|tx| detector::is_candidate(tx))
            .count();
        metrics.record_candidates(candidates);
        debug!(
            block = block.number,
            txs = block.transactions.len(),
            candidates,
            "processing block"
        );

        if candidates == 0 {
            self.mark_ingested(block.number).await;
            return 0;
        }

        let mut batches = block
            .transactions
            .chunks(self.session.config.batch_size)
            .map(|batch| self.process_batch(block, batch))
            .collect::<FuturesUnordered<_>>();
        let mut records = Vec::new();
        while let Some(confirmed) = batches.next().await {
            records.extend(confirmed);
        }

        if records.is_empty() {
            self.mark_ingested(block.number).await;
            return 0;
        }

        let found = records.len();
        match self.sink.store_batch(records).await {
            Ok(StoreOutcome::Inserted(stored)) => {
                info!(
                    block = block.number,
                    found, stored, "stored contract creations"
                );
                metrics.record_contracts(stored);
                self.mark_ingested(block.number).await;
                stored
            }
            Ok(StoreOutcome::AlreadyExists) => {
                info!(
                    block = block.number,
                    found, "contract creations already stored"
                );
                metrics.record_duplicate_batch();
                self.mark_ingested(block.number).await;
                0
            }
            Err(e) => {
                error!(
                    block = block.number,
                    found, "could not store contract creations: {e}"
                );
                metrics.record_store_failure();
                0
            }
        }
    }

    /// Confirms the candidates of one batch. Transactions whose receipt cannot
    /// be fetched are skipped.
    async fn process_batch(
        &self,
        block: &Block,
        batch: &[Transaction],
    ) -> Vec<ContractCreationRecord> {
        let candidates = batch
            .iter()
            .filter(|tx| detector::is_candidate(tx))
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Vec::new();
        }

        let Ok(_permit) = self.batch_permits.acquire().await else {
            error!(block = block.number, "batch semaphore closed");
            return Vec::new();
        };
        let _gauge = self.session.metrics.batch_started();

        stream::iter(candidates)
            .map(|tx| self.confirm(block, tx))
            .buffer_unordered(self.session.config.rpc_batch_size)
            .filter_map(futures::future::ready)
            .collect()
            .await
    }

    async fn confirm(&self, block: &Block, tx: &Transaction) -> Option<ContractCreationRecord> {
        match self.session.client.get_transaction_receipt(tx.hash).await {
            Ok(receipt) => detector::confirm(block, tx, &receipt),
            Err(e) => {
                self.skip(block.number, tx.hash, &e);
                None
            }
        }
    }

    fn skip(&self, block: u64, tx: B256, e: &RpcError) {
        warn!(block, %tx, "skipping transaction, receipt unavailable: {e}");
        self.session.metrics.record_receipt_failure();
    }

    async fn mark_ingested(&self, number: u64) {
        if let Err(e) = self.sink.mark_block_ingested(number).await {
            warn!(block = number, "could not mark block as ingested: {e}");
        }
    }
}
