use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_stream::try_stream;
use futures::Stream;
use tracing::debug;

use crate::error::RpcError;
use crate::provider::ChainClient;

/// Async stream of `(height, chain_head)` pairs produced while following the
/// chain. The head is the one observed when `height` was revealed.
pub type BlockIntervalStream =
    Pin<Box<dyn Stream<Item = Result<(u64, u64), RpcError>> + Send + 'static>>;

/// Heights to be scanned.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BlockInterval {
    /// A fixed range of heights.
    Range(Range<u64>),
    /// The `n` most recent heights, ending at the chain head.
    Recent(u64),
    /// Everything from `start_block` on, following the chain head. Without a
    /// start block, scanning begins with the first block mined after start-up.
    FollowFrom { start_block: Option<u64> },
}

impl BlockInterval {
    /// Parses an interval.
    ///
    /// Accepted forms:
    ///     * `block_number` for a single block
    ///     * `lhs..rhs`, `lhs..=rhs` as an exclusive/inclusive range
    ///     * `lhs..` to follow the chain from `lhs`
    ///     * `latest` for the head block, `latest~N` for the `N` most recent
    ///
    /// # Example
    ///
    /// ```rust
    ///    # use contract_scanner::block_interval::BlockInterval;
    ///    assert_eq!(BlockInterval::new("0..10").unwrap(), BlockInterval::Range(0..10));
    ///    assert_eq!(BlockInterval::new("0..=10").unwrap(), BlockInterval::Range(0..11));
    ///    assert_eq!(BlockInterval::new("32141").unwrap(), BlockInterval::Range(32141..32142));
    ///    assert_eq!(BlockInterval::new("100..").unwrap(), BlockInterval::FollowFrom { start_block: Some(100) });
    ///    assert_eq!(BlockInterval::new("latest~1000").unwrap(), BlockInterval::Recent(1000));
    /// ```
    pub fn new(s: &str) -> Result<BlockInterval> {
        let s = s.trim();
        let past = |last: u64| {
            last.checked_add(1)
                .ok_or_else(|| anyhow!("invalid block interval '{s}': block number too large"))
        };
        let parse = |num: &str| {
            num.trim()
                .parse::<u64>()
                .map_err(|_| anyhow!("invalid block number '{num}'"))
        };

        if let Some(recent) = s.strip_prefix("latest") {
            return match recent.strip_prefix('~') {
                None if recent.is_empty() => Ok(BlockInterval::Recent(1)),
                Some(count) => Ok(BlockInterval::Recent(parse(count)?)),
                None => Err(anyhow!("invalid block interval '{s}'")),
            };
        }

        match s.split_once("..") {
            None => {
                let num = s
                    .parse::<u64>()
                    .map_err(|_| anyhow!("invalid block interval '{s}'"))?;
                Ok(BlockInterval::Range(num..past(num)?))
            }
            Some(("", _)) => Err(anyhow!("invalid block interval '{s}': missing start block")),
            Some((lhs, "" | "=")) => Ok(BlockInterval::FollowFrom {
                start_block: Some(parse(lhs)?),
            }),
            Some((lhs, rhs)) => {
                let start = parse(lhs)?;
                let end = match rhs.strip_prefix('=') {
                    Some(inclusive) => past(parse(inclusive)?)?,
                    None => parse(rhs)?,
                };
                if end < start {
                    return Err(anyhow!("invalid block interval '{s}': end before start"));
                }
                Ok(BlockInterval::Range(start..end))
            }
        }
    }

    /// Resolves a bounded interval to concrete heights, asking the node for
    /// the head if needed.
    pub async fn resolve<C: ChainClient>(&self, client: &C) -> Result<Range<u64>> {
        match self {
            BlockInterval::Range(range) => Ok(range.clone()),
            BlockInterval::Recent(count) => {
                let head = client
                    .get_chain_head()
                    .await
                    .map_err(|e| anyhow!("could not retrieve latest block number: {e}"))?;
                Ok((head + 1).saturating_sub(*count)..head + 1)
            }
            BlockInterval::FollowFrom { .. } => Err(anyhow!(
                "could not resolve unbounded follow-from interval to a range"
            )),
        }
    }

    /// Converts a follow-from interval into an unbounded stream of heights in
    /// increasing order. Polls the head every `poll_interval` once caught up.
    pub async fn into_unbounded_stream<C>(
        self,
        client: Arc<C>,
        poll_interval: Duration,
    ) -> Result<BlockIntervalStream>
    where
        C: ChainClient + 'static,
    {
        let start_block = match self {
            BlockInterval::FollowFrom { start_block } => start_block,
            _ => {
                return Err(anyhow!(
                    "could not create unbounded follow-from stream from bounded interval"
                ))
            }
        };
        let mut next = match start_block {
            Some(start) => start,
            None => {
                client
                    .get_chain_head()
                    .await
                    .map_err(|e| anyhow!("could not retrieve latest block number: {e}"))?
                    + 1
            }
        };

        Ok(Box::pin(try_stream! {
            loop {
                let head = client.get_chain_head().await?;
                if next <= head {
                    for height in next..=head {
                        yield (height, head);
                    }
                    next = head + 1;
                } else {
                    debug!(next, head, "waiting for new blocks to be mined");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }))
    }
}

impl std::fmt::Display for BlockInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BlockInterval::Range(range) => write!(f, "{}..{}", range.start, range.end),
            BlockInterval::Recent(count) => write!(f, "latest {count}"),
            BlockInterval::FollowFrom {
                start_block: Some(start),
            } => write!(f, "{start}.."),
            BlockInterval::FollowFrom { start_block: None } => write!(f, "head.."),
        }
    }
}
