mod common;

use std::sync::Arc;

use alloy::primitives::{address, Address};
use common::*;
use contract_scanner::block_interval::BlockInterval;
use contract_scanner::error::RpcError;
use contract_scanner::metrics::Termination;
use contract_scanner::orchestrator::BatchOrchestrator;
use contract_scanner::scan::ScanLoop;
use contract_scanner::session::{ScanSession, Shutdown};
use contract_scanner::storage::{MemorySink, StorageSink as _};
use contract_scanner::types::Receipt;

fn setup(
    chain: FakeChain,
    config: contract_scanner::config::ScannerConfig,
) -> (
    Arc<FakeChain>,
    Arc<ScanSession<Arc<FakeChain>>>,
    Arc<MemorySink>,
) {
    let chain = Arc::new(chain);
    let session = Arc::new(ScanSession::new(chain.clone(), config));
    (chain, session, Arc::new(MemorySink::new()))
}

#[tokio::test]
async fn empty_block_costs_no_receipt_calls() {
    let (chain, session, sink) = setup(
        FakeChain::new(100).with_block(block(100, Vec::new()), []),
        test_config(),
    );
    let orchestrator = BatchOrchestrator::new(session.clone(), sink.clone());

    assert_eq!(orchestrator.process_block(100).await, Ok(0));
    assert_eq!(chain.receipt_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(sink.store_calls().await, 0);
    assert_eq!(session.metrics.snapshot().blocks_processed, 1);
}

#[tokio::test]
async fn block_without_candidates_costs_no_receipt_calls() {
    let (transfers, receipts) = mixed_block(100, 0, 12);
    let (chain, session, sink) = setup(
        FakeChain::new(100).with_block(transfers, receipts),
        test_config(),
    );
    let orchestrator = BatchOrchestrator::new(session.clone(), sink);

    assert_eq!(orchestrator.process_block(100).await, Ok(0));
    assert_eq!(chain.receipt_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    let snapshot = session.metrics.snapshot();
    assert_eq!(snapshot.transactions_processed, 12);
    assert_eq!(snapshot.candidates, 0);
}

#[tokio::test]
async fn single_deployment_is_recorded() {
    let deployed: Address = address!("abc0000000000000000000000000000000000abc");
    let tx = creation_tx(200, 0);
    let receipt = Receipt {
        status: true,
        gas_used: 250_000,
        contract_address: Some(deployed),
        logs_count: 2,
    };
    let (_, session, sink) = setup(
        FakeChain::new(200).with_block(block(200, vec![tx.clone()]), [(tx.hash, receipt)]),
        test_config(),
    );
    let orchestrator = BatchOrchestrator::new(session.clone(), sink.clone());

    assert_eq!(orchestrator.process_block(200).await, Ok(1));
    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.contract_address, deployed);
    assert_eq!(record.tx_hash, tx.hash);
    assert_eq!(record.block_number, 200);
    assert_eq!(record.creator_address, tx.from);
    assert_eq!(record.gas_used, 250_000);
    assert_eq!(record.logs_count, 2);
    assert_eq!(record.creation_timestamp, "2023-11-14T22:53:20Z");
    assert_eq!(session.metrics.snapshot().contracts_found, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_receipt_is_skipped_after_exhausting_retries() {
    let (deployments, receipts) = mixed_block(300, 3, 2);
    let throttled = tx_hash(300, 1);
    let chain = FakeChain::new(300)
        .with_block(deployments, receipts)
        .with_receipt_errors(
            throttled,
            vec![RpcError::RateLimited("429 Too Many Requests".into()); 3],
        );
    let config = contract_scanner::config::ScannerConfig {
        max_retries: 3,
        ..test_config()
    };
    let (chain, session, sink) = setup(chain, config);
    let orchestrator = BatchOrchestrator::new(session.clone(), sink.clone());

    assert_eq!(orchestrator.process_block(300).await, Ok(2));
    assert_eq!(chain.receipt_calls_for(throttled), 3);

    let stored = sink
        .records()
        .await
        .into_iter()
        .map(|r| r.contract_address)
        .collect::<Vec<_>>();
    assert_eq!(stored, vec![contract_address(300, 0), contract_address(300, 2)]);

    let snapshot = session.metrics.snapshot();
    assert_eq!(snapshot.receipt_failures, 1);
    assert_eq!(snapshot.rpc_errors, 3);
    assert_eq!(snapshot.contracts_found, 2);
    assert_eq!(sink.store_calls().await, 1);
}

#[tokio::test(start_paused = true)]
async fn block_cache_keeps_the_highest_heights() {
    let config = contract_scanner::config::ScannerConfig {
        cache_size: 20,
        ..test_config()
    };
    let (_, session, _) = setup(FakeChain::new(200), config);

    for height in 100..120 {
        session.cache.get_or_fetch(height).await.unwrap();
    }
    session.cache.get_or_fetch(120).await.unwrap();

    assert_eq!(session.cache.len().await, 20);
    assert_eq!(session.cache.heights().await, (101..=120).collect::<Vec<_>>());
}

#[tokio::test]
async fn second_run_over_same_range_finds_nothing_new() {
    let mut chain = FakeChain::new(410);
    for (number, creations) in [(401, 2), (403, 1), (407, 3)] {
        let (block, receipts) = mixed_block(number, creations, 4);
        chain = chain.with_block(block, receipts);
    }
    let (_, session, sink) = setup(chain, test_config());
    let mut scan = ScanLoop::new(session, sink.clone(), Shutdown::never());

    let first = scan.run_range(BlockInterval::new("400..=410").unwrap()).await;
    assert_eq!(first.termination, Some(Termination::Completed));
    assert_eq!(first.counters.contracts_found, 6);
    assert_eq!(first.counters.blocks_processed, 11);
    assert_eq!(first.counters.duplicate_batches, 0);

    let second = scan.run_range(BlockInterval::new("400..=410").unwrap()).await;
    assert_eq!(second.termination, Some(Termination::Completed));
    assert_eq!(second.counters.contracts_found, 0);
    assert_eq!(second.counters.duplicate_batches, 3);
    assert_eq!(second.counters.store_failures, 0);

    assert_eq!(sink.len().await, 6);
    assert!(sink.block_exists(410).await.unwrap());
}
