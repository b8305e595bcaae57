use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::provider::ChainClient;
use crate::types::Block;

/// Bounded cache of fetched blocks keyed by height.
///
/// When full, the lowest height is evicted rather than the least recently
/// used entry: scanning moves forward, so old heights are the least likely
/// to be asked for again.
pub struct BlockCache<C> {
    client: Arc<C>,
    capacity: usize,
    blocks: Mutex<BTreeMap<u64, Arc<Block>>>,
    in_flight: Mutex<HashMap<u64, Arc<OnceCell<Arc<Block>>>>>,
}

impl<C: ChainClient> BlockCache<C> {
    pub fn new(client: Arc<C>, capacity: usize) -> Self {
        Self {
            client,
            capacity: capacity.max(1),
            blocks: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached block, fetching and caching it on a miss.
    /// Concurrent misses on the same height share a single fetch.
    pub async fn get_or_fetch(&self, number: u64) -> Result<Arc<Block>, RpcError> {
        if let Some(block) = self.blocks.lock().await.get(&number).cloned() {
            debug!(block = number, "block cache hit");
            return Ok(block);
        }

        let cell = self
            .in_flight
            .lock()
            .await
            .entry(number)
            .or_default()
            .clone();
        let fetched = cell
            .get_or_try_init(|| async {
                let block = Arc::new(self.client.get_block(number).await?);
                self.insert(block.clone()).await;
                Ok::<_, RpcError>(block)
            })
            .await
            .cloned();

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&number)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&number);
        }
        fetched
    }

    /// Warms the cache with `number` ahead of its consumer. Failures are
    /// logged only; the consumer will fetch again.
    pub async fn prefetch(&self, number: u64) {
        if self.contains(number).await {
            return;
        }
        if let Err(e) = self.get_or_fetch(number).await {
            warn!(block = number, "prefetch failed: {e}");
        }
    }

    pub async fn contains(&self, number: u64) -> bool {
        self.blocks.lock().await.contains_key(&number)
    }

    pub async fn len(&self) -> usize {
        self.blocks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.lock().await.is_empty()
    }

    /// Cached heights in ascending order.
    pub async fn heights(&self) -> Vec<u64> {
        self.blocks.lock().await.keys().copied().collect()
    }

    async fn insert(&self, block: Arc<Block>) {
        let mut blocks = self.blocks.lock().await;
        if !blocks.contains_key(&block.number) && blocks.len() >= self.capacity {
            if let Some((evicted, _)) = blocks.pop_first() {
                debug!(block = evicted, "evicted from block cache");
            }
        }
        blocks.insert(block.number, block);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use alloy::primitives::B256;

    use super::*;
    use crate::types::Receipt;

    #[derive(Default)]
    struct Counting {
        fetches: AtomicU32,
    }

    impl ChainClient for Counting {
        async fn get_block(&self, number: u64) -> Result<Block, RpcError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if number == u64::MAX {
                return Err(RpcError::NotFound(format!("block {number}")));
            }
            Ok(Block {
                number,
                hash: B256::with_last_byte(number as u8),
                timestamp: 0,
                gas_used: 0,
                gas_limit: 0,
                transactions: vec![],
            })
        }

        async fn get_transaction_receipt(&self, hash: B256) -> Result<Receipt, RpcError> {
            Err(RpcError::NotFound(format!("receipt for {hash}")))
        }

        async fn get_chain_head(&self) -> Result<u64, RpcError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn hit_does_not_refetch() {
        let client = Arc::new(Counting::default());
        let cache = BlockCache::new(client.clone(), 4);

        let first = cache.get_or_fetch(10).await.unwrap();
        let second = cache.get_or_fetch(10).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let client = Arc::new(Counting::default());
        let cache = BlockCache::new(client.clone(), 4);

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch(10),
            cache.get_or_fetch(10),
            cache.get_or_fetch(11)
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(c.unwrap().number, 11);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evicts_lowest_height_at_capacity() {
        let client = Arc::new(Counting::default());
        let cache = BlockCache::new(client, 20);
        for number in 100..120 {
            cache.get_or_fetch(number).await.unwrap();
        }
        assert_eq!(cache.len().await, 20);

        cache.get_or_fetch(120).await.unwrap();
        assert_eq!(cache.heights().await, (101..=120).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn eviction_ignores_recency() {
        let client = Arc::new(Counting::default());
        let cache = BlockCache::new(client, 2);
        cache.get_or_fetch(5).await.unwrap();
        cache.get_or_fetch(6).await.unwrap();
        // A fresh hit on 5 does not protect it.
        cache.get_or_fetch(5).await.unwrap();
        cache.get_or_fetch(7).await.unwrap();
        assert_eq!(cache.heights().await, vec![6, 7]);
    }

    #[tokio::test]
    async fn prefetch_warms_and_swallows_errors() {
        let client = Arc::new(Counting::default());
        let cache = BlockCache::new(client.clone(), 4);

        cache.prefetch(3).await;
        cache.prefetch(3).await;
        cache.prefetch(u64::MAX).await;
        assert_eq!(cache.heights().await, vec![3]);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);

        cache.get_or_fetch(3).await.unwrap();
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);
    }
}
