use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use alloy::primitives::B256;
use alloy::rpc::types::{BlockId, BlockTransactionsKind};
use alloy::{providers::Provider, transports::Transport};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::RpcError;
use crate::types::{Block, Receipt};

/// Default bound on HTTP requests in flight at any moment.
pub const MAX_PARALLEL_REQUESTS: usize = 16;

/// The node operations the scanning pipeline depends on.
pub trait ChainClient: Send + Sync {
    /// Fetches a block with its full transaction list.
    fn get_block(&self, number: u64) -> impl Future<Output = Result<Block, RpcError>> + Send;

    fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Receipt, RpcError>> + Send;

    /// Number of the most recent block.
    fn get_chain_head(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;
}

impl<C: ChainClient> ChainClient for Arc<C> {
    fn get_block(&self, number: u64) -> impl Future<Output = Result<Block, RpcError>> + Send {
        self.deref().get_block(number)
    }

    fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Receipt, RpcError>> + Send {
        self.deref().get_transaction_receipt(hash)
    }

    fn get_chain_head(&self) -> impl Future<Output = Result<u64, RpcError>> + Send {
        self.deref().get_chain_head()
    }
}

/// [`ChainClient`] backed by an alloy provider.
pub struct RpcProvider<ProviderT, TransportT> {
    provider: Arc<ProviderT>,
    // `Alloy` provider is using `Reqwest` http client under the hood. It has an unbounded
    // connection pool, so the number of parallel requests is bounded here instead: every
    // call holds a permit for as long as its request is in flight.
    semaphore: Arc<Semaphore>,
    _phantom: std::marker::PhantomData<TransportT>,
}

pub struct ProviderGuard<'a, ProviderT> {
    provider: Arc<ProviderT>,
    _permit: SemaphorePermit<'a>,
}

impl<ProviderT> Deref for ProviderGuard<'_, ProviderT> {
    type Target = Arc<ProviderT>;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl<ProviderT, TransportT> RpcProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(provider: ProviderT, max_parallel_requests: usize) -> Self {
        Self {
            provider: provider.into(),
            semaphore: Arc::new(Semaphore::new(max_parallel_requests.max(1))),
            _phantom: std::marker::PhantomData,
        }
    }

    pub async fn get_provider(&self) -> Result<ProviderGuard<'_, ProviderT>, RpcError> {
        Ok(ProviderGuard {
            provider: self.provider.clone(),
            _permit: self
                .semaphore
                .acquire()
                .await
                .map_err(|e| RpcError::Fatal(e.to_string()))?,
        })
    }
}

impl<ProviderT, TransportT> ChainClient for RpcProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn get_block(&self, number: u64) -> Result<Block, RpcError> {
        let block = self
            .get_provider()
            .await?
            .get_block(BlockId::from(number), BlockTransactionsKind::Full)
            .await?
            .ok_or_else(|| RpcError::NotFound(format!("block {number}")))?;
        Ok(block.into())
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Receipt, RpcError> {
        let receipt = self
            .get_provider()
            .await?
            .get_transaction_receipt(hash)
            .await?
            .ok_or_else(|| RpcError::NotFound(format!("receipt for {hash}")))?;
        Ok(receipt.into())
    }

    async fn get_chain_head(&self) -> Result<u64, RpcError> {
        Ok(self.get_provider().await?.get_block_number().await?)
    }
}
