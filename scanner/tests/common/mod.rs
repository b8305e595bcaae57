//! Scripted in-memory chain shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use contract_scanner::config::ScannerConfig;
use contract_scanner::error::RpcError;
use contract_scanner::provider::ChainClient;
use contract_scanner::types::{Block, Receipt, Transaction};

/// Fake node. Heights up to the head without a scripted block come back
/// empty; heights above the head are not found.
#[derive(Default)]
pub struct FakeChain {
    head: AtomicU64,
    head_error: Mutex<Option<RpcError>>,
    blocks: Mutex<HashMap<u64, Block>>,
    receipts: Mutex<HashMap<B256, Receipt>>,
    receipt_errors: Mutex<HashMap<B256, Vec<RpcError>>>,
    receipt_delay: Option<Duration>,
    pub block_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
    receipt_calls_by_tx: Mutex<HashMap<B256, usize>>,
}

impl FakeChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    /// Adds `block` and the receipts of its transactions.
    pub fn with_block(self, block: Block, receipts: impl IntoIterator<Item = (B256, Receipt)>) -> Self {
        self.receipts.lock().unwrap().extend(receipts);
        self.blocks.lock().unwrap().insert(block.number, block);
        self
    }

    /// Fails the next `errors.len()` receipt fetches for `hash`.
    pub fn with_receipt_errors(self, hash: B256, errors: Vec<RpcError>) -> Self {
        self.receipt_errors
            .lock()
            .unwrap()
            .insert(hash, errors.into_iter().rev().collect());
        self
    }

    pub fn with_receipt_delay(mut self, delay: Duration) -> Self {
        self.receipt_delay = Some(delay);
        self
    }

    /// Every following head query fails with `error`.
    pub fn fail_head(&self, error: RpcError) {
        *self.head_error.lock().unwrap() = Some(error);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn receipt_calls_for(&self, hash: B256) -> usize {
        self.receipt_calls_by_tx
            .lock()
            .unwrap()
            .get(&hash)
            .copied()
            .unwrap_or_default()
    }
}

impl ChainClient for FakeChain {
    async fn get_block(&self, number: u64) -> Result<Block, RpcError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(block) = self.blocks.lock().unwrap().get(&number) {
            return Ok(block.clone());
        }
        if number <= self.head.load(Ordering::SeqCst) {
            Ok(block(number, Vec::new()))
        } else {
            Err(RpcError::NotFound(format!("block {number}")))
        }
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Receipt, RpcError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .receipt_calls_by_tx
            .lock()
            .unwrap()
            .entry(hash)
            .or_default() += 1;
        if let Some(delay) = self.receipt_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .receipt_errors
            .lock()
            .unwrap()
            .get_mut(&hash)
            .and_then(Vec::pop);
        if let Some(e) = scripted {
            return Err(e);
        }
        self.receipts
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("receipt for {hash}")))
    }

    async fn get_chain_head(&self) -> Result<u64, RpcError> {
        if let Some(e) = self.head_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.head.load(Ordering::SeqCst))
    }
}

/// Fast, unthrottled settings.
pub fn test_config() -> ScannerConfig {
    ScannerConfig {
        rpc_limit: 10_000,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        poll_interval: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn tx_hash(block: u64, index: u8) -> B256 {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&block.to_be_bytes());
    hash[31] = index;
    B256::from(hash)
}

pub fn contract_address(block: u64, index: u8) -> Address {
    let mut address = [0u8; 20];
    address[..8].copy_from_slice(&block.to_be_bytes());
    address[19] = index;
    Address::from(address)
}

/// Recipient-less deployment.
pub fn creation_tx(block: u64, index: u8) -> Transaction {
    Transaction {
        hash: tx_hash(block, index),
        from: Address::repeat_byte(0xaa),
        to: None,
        input: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80]),
        value: U256::ZERO,
        gas_price: Some(20_000_000_000),
    }
}

/// Plain value transfer.
pub fn transfer_tx(block: u64, index: u8) -> Transaction {
    Transaction {
        hash: tx_hash(block, index),
        from: Address::repeat_byte(0xaa),
        to: Some(Address::repeat_byte(0xbb)),
        input: Bytes::new(),
        value: U256::from(1_000u64),
        gas_price: Some(20_000_000_000),
    }
}

pub fn block(number: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        number,
        hash: B256::left_padding_from(&number.to_be_bytes()),
        timestamp: 1_700_000_000 + number * 12,
        gas_used: 0,
        gas_limit: 30_000_000,
        transactions,
    }
}

/// Receipt of a successful deployment at `contract_address(block, index)`.
pub fn created(block: u64, index: u8) -> (B256, Receipt) {
    (
        tx_hash(block, index),
        Receipt {
            status: true,
            gas_used: 120_000,
            contract_address: Some(contract_address(block, index)),
            logs_count: 1,
        },
    )
}

pub fn transferred(block: u64, index: u8) -> (B256, Receipt) {
    (
        tx_hash(block, index),
        Receipt {
            status: true,
            gas_used: 21_000,
            contract_address: None,
            logs_count: 0,
        },
    )
}

/// A block with `creations` deployments followed by `transfers` transfers,
/// and the matching receipts.
pub fn mixed_block(number: u64, creations: u8, transfers: u8) -> (Block, Vec<(B256, Receipt)>) {
    let mut transactions = Vec::new();
    let mut receipts = Vec::new();
    for index in 0..creations {
        transactions.push(creation_tx(number, index));
        receipts.push(created(number, index));
    }
    for index in creations..creations + transfers {
        transactions.push(transfer_tx(number, index));
        receipts.push(transferred(number, index));
    }
    (block(number, transactions), receipts)
}
